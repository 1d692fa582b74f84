//! 访问器路径性能基准测试
//!
//! 对比每次解析与缓存解析结果后的求值开销，以及一帧内的完整分发

use std::hint::black_box;

use bridge_engine::accessor::{assign, evaluate, AccessorPath, PathCache};
use bridge_engine::bridge::{Bridge, Envelope};
use bridge_engine::convert::{Color, ConvertContext};
use bridge_engine::scene::{SceneNode, SceneObject, Transform};
use bridge_engine::transport::LoopbackTransport;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use serde_json::json;

const PATHS: [&str; 4] = [
    "position/x",
    "transform:arm/transform:hand/component:Tint/r",
    "transform:arm/transform:../name",
    "method:find(hand)",
];

fn rig() -> SceneObject {
    SceneObject::new(
        SceneNode::new("rig").with_child(
            SceneNode::new("arm")
                .with_transform(Transform::from_position(Vec3::Y))
                .with_child(SceneNode::new("hand").with_component(
                    "Tint",
                    Color {
                        r: 0.5,
                        g: 0.25,
                        b: 1.0,
                        a: 1.0,
                    },
                )),
        ),
    )
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("accessor_parse");
    for path in PATHS {
        group.bench_with_input(BenchmarkId::from_parameter(path), path, |b, path| {
            b.iter(|| black_box(AccessorPath::parse(black_box(path))));
        });
    }
    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let object = rig();
    let ctx = ConvertContext::new(None, None);
    let mut group = c.benchmark_group("accessor_evaluate");

    for path in PATHS {
        group.bench_with_input(BenchmarkId::new("parse_each_time", path), path, |b, path| {
            b.iter(|| {
                let parsed = AccessorPath::parse(path).unwrap();
                black_box(evaluate(&object, &parsed, &ctx))
            });
        });

        let mut cache = PathCache::default();
        group.bench_with_input(BenchmarkId::new("cached", path), path, |b, path| {
            b.iter(|| {
                let parsed = cache.get_or_parse(path).unwrap();
                black_box(evaluate(&object, parsed, &ctx))
            });
        });
    }
    group.finish();
}

fn bench_assign(c: &mut Criterion) {
    let mut object = rig();
    let ctx = ConvertContext::new(None, None);
    let path = AccessorPath::parse("transform:arm/transform:hand/component:Tint").unwrap();
    let value = json!("#FF8000");
    c.bench_function("accessor_assign_color", |b| {
        b.iter(|| black_box(assign(&mut object, &path, &value, &ctx)));
    });
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge_tick");
    for count in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let transport = LoopbackTransport::new(count * 2, true);
            let endpoint = transport.endpoint();
            let mut bridge = Bridge::new(Box::new(transport));
            bridge.register_with_id("obj1", rig()).unwrap();
            bridge.start().unwrap();
            b.iter(|| {
                for i in 0..count {
                    endpoint
                        .send(&Envelope::for_object(
                            "obj1",
                            "query",
                            json!({"callbackId": i, "x": "position/x"}),
                        ))
                        .unwrap();
                }
                black_box(bridge.tick(1.0 / 60.0));
                black_box(endpoint.receive_raw());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_evaluate, bench_assign, bench_tick);
criterion_main!(benches);

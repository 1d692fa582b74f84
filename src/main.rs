use std::thread;
use std::time::{Duration, Instant};

use bevy_ecs::prelude::*;
use bridge_engine::bridge::{bridge_tick_system, Bridge, BridgeStats, FrameTime};
use bridge_engine::config::BridgeConfig;
use bridge_engine::scene::SceneObject;

const FRAME: Duration = Duration::from_millis(16);

/// 宿主进程：加载配置，启动桥接，按固定帧率推进。
/// 可选参数 `--ticks N` 在 N 帧后退出。
fn main() {
    if let Err(e) = run() {
        eprintln!("Bridge host failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = BridgeConfig::load_or_default();
    config.apply_env_overrides();
    config.validate()?;
    bridge_engine::logging::init(&config.logging)?;

    let max_ticks = parse_ticks(std::env::args().skip(1))?;

    let mut bridge = Bridge::from_config(&config)?;
    bridge.register_type::<SceneObject>("SceneObject");
    bridge.start()?;

    let mut world = World::new();
    world.insert_non_send_resource(bridge);
    world.insert_resource(FrameTime::default());
    world.insert_resource(BridgeStats::default());

    let mut schedule = Schedule::default();
    schedule.add_systems(bridge_tick_system);

    let mut last = Instant::now();
    let mut ticks = 0u64;
    while max_ticks.map_or(true, |max| ticks < max) {
        let now = Instant::now();
        world
            .resource_mut::<FrameTime>()
            .advance((now - last).as_secs_f32());
        last = now;

        schedule.run(&mut world);
        ticks += 1;

        let elapsed = now.elapsed();
        if elapsed < FRAME {
            thread::sleep(FRAME - elapsed);
        }
    }

    let stats = *world.resource::<BridgeStats>();
    tracing::info!(target: "bridge", "Host exiting after {} ticks: {:?}", ticks, stats);
    world.non_send_resource_mut::<Bridge>().stop();
    Ok(())
}

fn parse_ticks(mut args: impl Iterator<Item = String>) -> Result<Option<u64>, String> {
    while let Some(arg) = args.next() {
        if arg == "--ticks" {
            let value = args.next().ok_or("--ticks needs a value")?;
            return value
                .parse()
                .map(Some)
                .map_err(|e| format!("invalid --ticks `{}`: {}", value, e));
        }
    }
    Ok(None)
}

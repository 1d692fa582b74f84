use bridge_engine::accessor::{assign, evaluate, AccessorPath};
use bridge_engine::bridge::{events, Bridge, Envelope};
use bridge_engine::convert::{decode, encode, Color, ConvertContext};
use bridge_engine::scene::SceneObject;
use bridge_engine::transport::{ControlEndpoint, LoopbackTransport, ScriptTransport};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::io::Write;

fn loopback_bridge() -> (Bridge, ControlEndpoint) {
    let transport = LoopbackTransport::new(256, true);
    let endpoint = transport.endpoint();
    let mut bridge = Bridge::new(Box::new(transport));
    bridge.register_type::<SceneObject>("SceneObject");
    bridge.start().unwrap();
    (bridge, endpoint)
}

fn event_names(envelopes: &[Envelope]) -> Vec<&str> {
    envelopes.iter().map(|e| e.event.as_str()).collect()
}

#[test]
fn test_update_then_read_position() -> anyhow::Result<()> {
    let (mut bridge, endpoint) = loopback_bridge();
    bridge.register_with_id("obj1", SceneObject::default())?;

    endpoint.send_raw(r#"{"event":"update","id":"obj1","data":{"position":{"x":1,"y":2,"z":3}}}"#)?;
    let report = bridge.tick(1.0 / 60.0);
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.failed, 0);

    let x = bridge.evaluate("obj1", "position/x")?;
    assert_eq!(x.as_f64(), Some(1.0));
    let z = bridge.evaluate("obj1", "transform/position/z")?;
    assert_eq!(z.as_f64(), Some(3.0));
    Ok(())
}

#[test]
fn test_query_unknown_id_reports_object_not_found() {
    let (mut bridge, endpoint) = loopback_bridge();
    bridge.register_with_id("obj1", SceneObject::default()).unwrap();
    let before = bridge.ids();

    endpoint
        .send_raw(r#"{"event":"query","id":"unknown-id","data":{}}"#)
        .unwrap();
    let report = bridge.tick(0.0);
    assert_eq!(report.failed, 1);
    assert_eq!(bridge.ids(), before);
    assert!(bridge.registry().is_consistent());

    let received = endpoint.receive();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].event, events::ERROR);
    assert_eq!(received[0].id.as_deref(), Some("unknown-id"));
    let data = received[0].data.as_ref().unwrap();
    assert_eq!(data["code"], json!("ObjectNotFound"));
    assert_eq!(data["request"], json!("query"));
}

#[test]
fn test_malformed_frames_are_dropped() {
    let (mut bridge, endpoint) = loopback_bridge();
    endpoint.send_raw("not json at all").unwrap();
    endpoint
        .send_raw(r#"[{"event":"query","id":"nobody"},{"id":"no-event"}]"#)
        .unwrap();
    let report = bridge.tick(0.0);
    assert_eq!(report.malformed, 2);
    assert_eq!(report.dispatched, 1);
    let received = endpoint.receive();
    assert_eq!(event_names(&received), vec![events::ERROR]);
}

#[test]
fn test_register_unregister_round_trip() {
    let (mut bridge, _endpoint) = loopback_bridge();
    bridge.register_with_id("keep", SceneObject::default()).unwrap();
    let before = bridge.ids();

    let id = bridge.register(SceneObject::default()).unwrap();
    assert!(bridge.contains(&id));
    bridge.unregister(&id).unwrap();

    assert_eq!(bridge.ids(), before);
    assert_eq!(bridge.len(), 1);
    assert!(bridge.registry().is_consistent());
    assert!(bridge.registry().key_of(&id).is_none());
}

#[test]
fn test_deleted_object_keeps_queued_outbound_then_destroyed() {
    let (mut bridge, endpoint) = loopback_bridge();
    bridge.register_with_id("obj1", SceneObject::default()).unwrap();

    bridge.send_event("obj1", "status", json!({"ready": true}));
    endpoint.send(&Envelope::new(events::DELETE).with_id("obj1")).unwrap();
    endpoint
        .send(&Envelope::for_object("obj1", "translate", json!([1, 0, 0])))
        .unwrap();
    let report = bridge.tick(0.0);

    assert!(!bridge.contains("obj1"));
    assert_eq!(report.failed, 1);
    let received = endpoint.receive();
    assert_eq!(
        event_names(&received),
        vec!["status", events::DESTROYED, events::ERROR]
    );
    assert_eq!(received[2].data.as_ref().unwrap()["code"], json!("ObjectNotFound"));
}

#[test]
fn test_outbound_buffered_before_start() {
    let transport = LoopbackTransport::new(16, true);
    let endpoint = transport.endpoint();
    let mut bridge = Bridge::new(Box::new(transport));

    for i in 0..3 {
        bridge.send_event("host", "frame", json!(i));
    }
    let report = bridge.tick(0.0);
    assert_eq!(report.flushed, 0);
    assert_eq!(bridge.pending_outbound(), 3);
    assert!(endpoint.receive().is_empty());

    bridge.start().unwrap();
    let report = bridge.tick(0.0);
    assert_eq!(report.flushed, 3);
    let data: Vec<Value> = endpoint
        .receive()
        .into_iter()
        .map(|e| e.data.unwrap())
        .collect();
    assert_eq!(data, vec![json!(0), json!(1), json!(2)]);
}

#[test]
fn test_create_with_template_interests_and_post_events() {
    let (mut bridge, endpoint) = loopback_bridge();
    bridge
        .register_template("crate", "SceneObject", json!({"name": "crate", "scale": [2, 2, 2]}))
        .unwrap();

    endpoint
        .send(&Envelope::for_object(
            "box",
            events::CREATE,
            json!({
                "template": "crate",
                "update": {"position": [1, 0, 0]},
                "interests": {"moved": {"query": {"x": "position/x"}}},
                "postEvents": [{"event": "translate", "data": [1, 0, 0]}],
                "callbackId": "c1"
            }),
        ))
        .unwrap();
    let report = bridge.tick(0.0);
    assert_eq!(report.failed, 0);

    assert_eq!(bridge.type_of("box"), Some("SceneObject"));
    assert_eq!(bridge.evaluate("box", "name").unwrap(), json!("crate"));
    assert_eq!(bridge.evaluate("box", "scale/y").unwrap().as_f64(), Some(2.0));

    let received = endpoint.receive();
    assert_eq!(event_names(&received), vec![events::CREATED, "moved"]);
    assert_eq!(
        received[0].data,
        Some(json!({"type": "SceneObject", "callbackId": "c1"}))
    );
    let moved = received[1].data.as_ref().unwrap();
    assert_eq!(moved["query"]["x"].as_f64(), Some(2.0));
}

#[test]
fn test_create_duplicate_id_fails() {
    let (mut bridge, endpoint) = loopback_bridge();
    bridge.register_with_id("taken", SceneObject::default()).unwrap();
    endpoint
        .send(&Envelope::for_object("taken", events::CREATE, json!({"type": "SceneObject"})))
        .unwrap();
    bridge.tick(0.0);
    let received = endpoint.receive();
    assert_eq!(received[0].data.as_ref().unwrap()["code"], json!("DuplicateId"));
    assert_eq!(bridge.len(), 1);
}

#[test]
fn test_conditional_steps_yield_null() {
    let object = SceneObject::default();
    let ctx = ConvertContext::new(None, None);
    for source in ["?missing", "?missing/x", "position/?w", "?index:7/name"] {
        let path = AccessorPath::parse(source).unwrap();
        assert_eq!(evaluate(&object, &path, &ctx).unwrap(), Value::Null, "{}", source);
    }

    let mut object = SceneObject::default();
    let path = AccessorPath::parse("?missing/x").unwrap();
    assert!(assign(&mut object, &path, &json!(5), &ctx).is_ok());
}

#[test]
fn test_color_forms_decode_equal() {
    let ctx = ConvertContext::new(None, None);
    let from_hex: Color = decode(&json!("#FF0000"), &ctx).unwrap();
    let from_object: Color = decode(&json!({"r": 1, "g": 0, "b": 0}), &ctx).unwrap();
    assert_eq!(from_hex, from_object);

    let encoded = encode(&from_hex);
    assert_eq!(encoded, encode(&from_object));
    let again: Color = decode(&encoded, &ctx).unwrap();
    assert_eq!(encode(&again), encoded);
}

#[test]
fn test_script_control_side_end_to_end() {
    let mut bootstrap = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        bootstrap,
        r#"
        bridge.onMessage(function (e) {{
            if (e.event === "callback") {{
                bridge.send({{event: "update", id: e.id, data: {{name: "seen-" + e.data.result.x}}}});
            }}
        }});
        bridge.send([
            {{event: "update", id: "obj1", data: {{"position/x": 4}}}},
            {{event: "query", id: "obj1", data: {{callbackId: 1, x: "position/x"}}}}
        ]);
        "#
    )
    .unwrap();

    let transport = ScriptTransport::new(64, true)
        .unwrap()
        .with_bootstrap_file(bootstrap.path());
    let mut bridge = Bridge::new(Box::new(transport));
    bridge.register_with_id("obj1", SceneObject::default()).unwrap();
    bridge.start().unwrap();
    assert!(bridge.transport().is_started());

    let first = bridge.tick(0.0);
    assert_eq!(first.dispatched, 2);
    assert_eq!(first.flushed, 1);
    let second = bridge.tick(0.0);
    assert_eq!(second.dispatched, 1);
    assert_eq!(bridge.evaluate("obj1", "name").unwrap(), json!("seen-4"));
}

proptest! {
    #[test]
    fn prop_inbound_dispatch_is_fifo(values in prop::collection::vec(-1000i32..1000, 1..20)) {
        let (mut bridge, endpoint) = loopback_bridge();
        bridge.register_with_id("obj1", SceneObject::default()).unwrap();

        for (i, value) in values.iter().enumerate() {
            endpoint.send(&Envelope::for_object("obj1", events::UPDATE, json!({"position/x": value}))).unwrap();
            endpoint.send(&Envelope::for_object("obj1", events::QUERY, json!({"callbackId": i, "x": "position/x"}))).unwrap();
        }
        let report = bridge.tick(0.0);
        prop_assert_eq!(report.failed, 0);

        let received = endpoint.receive();
        prop_assert_eq!(received.len(), values.len());
        for (i, (envelope, value)) in received.iter().zip(&values).enumerate() {
            let data = envelope.data.as_ref().unwrap();
            prop_assert_eq!(&data["callbackId"], &json!(i));
            prop_assert_eq!(data["result"]["x"].as_f64(), Some(*value as f64));
        }
    }

    #[test]
    fn prop_read_write_round_trip(
        path in prop::sample::select(vec!["position/x", "position/y", "scale/z", "velocity/x", "transform/scale/x"]),
        value in -10_000i32..10_000,
    ) {
        let mut object = SceneObject::default();
        let ctx = ConvertContext::new(None, None);
        let path = AccessorPath::parse(path).unwrap();
        assign(&mut object, &path, &json!(value), &ctx).unwrap();
        let read = evaluate(&object, &path, &ctx).unwrap();
        prop_assert_eq!(read.as_f64(), Some(value as f64));
    }
}

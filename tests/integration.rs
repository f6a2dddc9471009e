//! Integration Tests for Reflect Engine
//!
//! End-to-end scenarios driven through the public [`Reflector`] API, with
//! sessions attached to inspectable [`QueueOutbox`]es.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `scenario_*` - Reference fan-out, filter, supersede and detach flows
//! - `batching_*` - Ceiling, ordering and supersede behaviour of batches
//! - `session_*` - Per-session flags, quotas and lifecycle
//! - `dispatch_*` - Command execution, batches, queries and bounces

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::watch;

use reflect_engine::{
    ChannelOutbox, Command, CommandOutcome, IndexOp, Outbound, Payload, QueryFilter, QueueOutbox, ReflectError,
    Reflector, ReflectorConfig, ReflectorHooks, SessionId, SetNodeFlags, UpdateMessage,
};

// =============================================================================
// Helpers
// =============================================================================

fn reflector(sessions: &[(&str, &str)]) -> Reflector {
    reflector_with_config(ReflectorConfig::default(), sessions)
}

fn reflector_with_config(config: ReflectorConfig, sessions: &[(&str, &str)]) -> Reflector {
    let mut r = Reflector::new(config);
    for (host, id) in sessions {
        r.attach(SessionId::from(*id), Some(host), Box::new(QueueOutbox::new()))
            .expect("attach");
    }
    r
}

fn payload(v: serde_json::Value) -> Payload {
    Payload::new(v)
}

/// Flush everything, then drain `session`'s update messages.
fn updates(r: &mut Reflector, session: &str) -> Vec<UpdateMessage> {
    r.flush_all();
    r.take_outgoing(session)
        .into_iter()
        .filter_map(|o| match o {
            Outbound::Update(m) => Some(m),
            Outbound::Unimplemented { .. } | Outbound::Pong { .. } => None,
        })
        .collect()
}

fn set(r: &mut Reflector, session: &str, path: &str, v: serde_json::Value) {
    r.set_node(session, path, payload(v), SetNodeFlags::default())
        .expect("set_node");
}

// =============================================================================
// Reference scenarios
// =============================================================================

#[test]
fn scenario_fan_out_to_matching_subscribers_only() {
    let mut r = reflector(&[("hostA", "sess-Z"), ("hostB", "X"), ("hostC", "Y"), ("hostD", "W")]);
    r.subscribe("X", "/*/*/room1/*", None, true).unwrap();
    r.subscribe("Y", "/*/*/room1/*", None, true).unwrap();
    r.subscribe("W", "/*/*/room2/*", None, true).unwrap();

    let p = json!({"text": "hello"});
    set(&mut r, "sess-Z", "room1/msg1", p.clone());

    for subscriber in ["X", "Y"] {
        let msgs = updates(&mut r, subscriber);
        assert_eq!(msgs.len(), 1, "{subscriber} should get exactly one update");
        let entries = &msgs[0].changed["/hostA/sess-Z/room1/msg1"];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value(), &p);
        assert_eq!(msgs[0].item_count(), 1);
    }
    assert!(updates(&mut r, "W").is_empty());
    // Z didn't subscribe and doesn't see its own write
    assert!(updates(&mut r, "sess-Z").is_empty());
}

#[test]
fn scenario_filter_transitions() {
    let mut r = reflector(&[("hostA", "Z"), ("hostB", "X")]);
    r.subscribe("X", "/*/*/item", Some(QueryFilter::field_eq("status", "ready")), true)
        .unwrap();

    set(&mut r, "Z", "item", json!({"status": "pending"}));
    assert!(updates(&mut r, "X").is_empty());

    set(&mut r, "Z", "item", json!({"status": "ready"}));
    let msgs = updates(&mut r, "X");
    assert_eq!(msgs.len(), 1);
    assert_eq!(
        msgs[0].latest("/hostA/Z/item").unwrap().get("status"),
        Some(&json!("ready"))
    );

    set(&mut r, "Z", "item", json!({"status": "done"}));
    let msgs = updates(&mut r, "X");
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].changed.is_empty());
    assert_eq!(msgs[0].removed, vec!["/hostA/Z/item".to_string()]);

    // Invisible to X, so its removal is not reported either
    r.remove_nodes("Z", "item", None, false).unwrap();
    assert!(updates(&mut r, "X").is_empty());
}

#[test]
fn scenario_supersede_collapses_pending_updates() {
    let mut r = reflector(&[("h", "Z"), ("h", "X")]);
    r.subscribe("X", "counter", None, true).unwrap();

    let flags = SetNodeFlags::default().with_supersede();
    for i in 0..10 {
        r.set_node("Z", "counter", payload(json!({"n": i})), flags).unwrap();
    }
    let msgs = updates(&mut r, "X");
    assert_eq!(msgs.len(), 1);
    let entries = &msgs[0].changed["/h/Z/counter"];
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("n"), Some(&json!(9)));
}

#[test]
fn scenario_detach_forgets_session() {
    let mut r = reflector(&[("h", "gone"), ("h", "stays")]);
    set(&mut r, "stays", "room/a", json!({}));
    set(&mut r, "gone", "room/b", json!({}));
    r.subscribe("gone", "room/*", None, true).unwrap();

    let node = r.tree().find("/h/stays/room/a").unwrap();
    assert_eq!(r.tree().get(node).unwrap().subscribers().count("gone"), 1);

    r.detach("gone").unwrap();

    assert!(r.subscriptions("gone").is_none());
    assert!(r.session_info("gone").is_none());
    assert!(r.tree().find("/h/gone").is_none());
    assert!(r.tree().find("/h/stays").is_some());
    assert!(!r.tree().get(node).unwrap().subscribers().contains("gone"));

    let found = r.find_matching_sessions("room/*", None, None).unwrap();
    assert_eq!(found, vec![SessionId::from("stays")]);
    let all = r.find_matching_sessions("", None, None).unwrap();
    assert!(!all.contains(&SessionId::from("gone")));

    assert!(matches!(r.detach("gone"), Err(ReflectError::NotFound(_))));
}

#[test]
fn scenario_host_anchor_removed_with_last_session() {
    let mut r = reflector(&[("solo", "s")]);
    assert!(r.tree().find("/solo").is_some());
    r.detach("s").unwrap();
    assert!(r.tree().find("/solo").is_none());
    assert_eq!(r.node_count(), 1);
}

#[test]
fn scenario_equal_subscriber_sets_share_one_instance() {
    let config = ReflectorConfig { pool_max_cached_sets: 2, ..ReflectorConfig::default() };
    let mut r = reflector_with_config(config, &[("h", "w"), ("h", "a"), ("h", "b"), ("h", "c")]);
    r.subscribe("a", "x*", None, true).unwrap();
    r.subscribe("b", "y*", None, true).unwrap();
    r.subscribe("c", "z*", None, true).unwrap();

    // Three live sets against a bound of two
    for name in ["x1", "y1", "z1", "x2"] {
        set(&mut r, "w", name, json!({}));
    }
    let subscribers = |r: &Reflector, path: &str| {
        let node = r.tree().find(path).unwrap();
        r.tree().get(node).unwrap().subscribers().clone()
    };
    let x1 = subscribers(&r, "/h/w/x1");
    let x2 = subscribers(&r, "/h/w/x2");
    assert_eq!(x1.count("a"), 1);
    assert!(Arc::ptr_eq(&x1, &x2));
    assert!(!Arc::ptr_eq(&x1, &subscribers(&r, "/h/w/y1")));
    assert!(r.pool_stats().overflows > 0);

    // A set nothing holds any more may go; the live ones stay shared
    r.remove_nodes("w", "z1", None, false).unwrap();
    set(&mut r, "w", "y2", json!({}));
    assert!(Arc::ptr_eq(&subscribers(&r, "/h/w/y1"), &subscribers(&r, "/h/w/y2")));
}

// =============================================================================
// Batching
// =============================================================================

#[test]
fn batching_remove_then_add_forces_flush() {
    let mut r = reflector(&[("h", "Z"), ("h", "X")]);
    r.subscribe("X", "room/*", None, true).unwrap();
    set(&mut r, "Z", "room/m", json!({"v": 1}));
    updates(&mut r, "X");

    r.remove_nodes("Z", "room/m", None, false).unwrap();
    set(&mut r, "Z", "room/m", json!({"v": 2}));
    let msgs = updates(&mut r, "X");

    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].removed, vec!["/h/Z/room/m".to_string()]);
    assert!(msgs[0].changed.is_empty());
    assert_eq!(msgs[1].latest("/h/Z/room/m").unwrap().get("v"), Some(&json!(2)));
}

#[test]
fn batching_ceiling_splits_messages() {
    let config = ReflectorConfig {
        max_update_message_items: 3,
        ..ReflectorConfig::default()
    };
    let mut r = reflector_with_config(config, &[("h", "Z"), ("h", "X")]);
    r.subscribe("X", "log/*", None, true).unwrap();
    for i in 0..7 {
        set(&mut r, "Z", &format!("log/e{i}"), json!({"i": i}));
    }
    let sizes: Vec<usize> = updates(&mut r, "X").iter().map(UpdateMessage::item_count).collect();
    // "log" itself doesn't match, the seven entries do
    assert_eq!(sizes, vec![3, 3, 1]);
}

#[test]
fn batching_supersede_erases_already_queued_messages() {
    let mut r = reflector(&[("h", "Z"), ("h", "X")]);
    r.set_max_update_items("X", Some(1)).unwrap();
    r.subscribe("X", "pos", None, true).unwrap();

    let flags = SetNodeFlags::default().with_supersede();
    for i in 0..4 {
        r.set_node("Z", "pos", payload(json!({"x": i})), flags).unwrap();
    }
    let msgs = updates(&mut r, "X");
    let all: Vec<&Payload> = msgs
        .iter()
        .filter_map(|m| m.changed.get("/h/Z/pos"))
        .flatten()
        .collect();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("x"), Some(&json!(3)));
}

#[test]
fn batching_without_supersede_keeps_every_value() {
    let mut r = reflector(&[("h", "Z"), ("h", "X")]);
    r.subscribe("X", "pos", None, true).unwrap();
    for i in 0..4 {
        set(&mut r, "Z", "pos", json!({"x": i}));
    }
    let msgs = updates(&mut r, "X");
    assert_eq!(msgs[0].changed["/h/Z/pos"].len(), 4);
}

#[test]
fn batching_index_tokens_replay_to_index() {
    let mut r = reflector(&[("h", "Z"), ("h", "X")]);
    set(&mut r, "Z", "list", json!({}));
    r.subscribe("X", "list", None, false).unwrap();

    r.insert_ordered_node("Z", "list", payload(json!({})), None).unwrap();
    r.insert_ordered_node("Z", "list", payload(json!({})), Some("I0")).unwrap();
    r.insert_ordered_node("Z", "list", payload(json!({})), None).unwrap();
    r.reorder_node("Z", "list/I2", Some("I1")).unwrap();
    r.remove_nodes("Z", "list/I0", None, false).unwrap();

    let mut replica = Vec::new();
    for msg in updates(&mut r, "X") {
        if let Some(ops) = msg.index_updates.get("/h/Z/list") {
            reflect_engine::tree::index::apply_all(&mut replica, ops).unwrap();
        }
    }
    let list = r.tree().find("/h/Z/list").unwrap();
    assert_eq!(replica, r.tree().index_names(list).unwrap());
    assert_eq!(replica, vec!["I2".to_string(), "I1".to_string()]);
}

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn session_quota_fails_only_that_write() {
    let mut r = reflector(&[("h", "Z")]);
    r.set_node_quota("Z", 2).unwrap();
    set(&mut r, "Z", "a", json!({}));
    set(&mut r, "Z", "b", json!({}));
    let err = r
        .set_node("Z", "c", payload(json!({})), SetNodeFlags::default())
        .unwrap_err();
    assert!(matches!(err, ReflectError::AccessDenied(_)));

    // Overwrites don't allocate
    set(&mut r, "Z", "a", json!({"v": 2}));

    r.remove_nodes("Z", "b", None, false).unwrap();
    set(&mut r, "Z", "c", json!({}));
    assert_eq!(r.session_info("Z").unwrap().node_count, 2);
}

#[test]
fn session_reflect_to_self() {
    let mut r = reflector(&[("h", "Z")]);
    r.subscribe("Z", "mine/*", None, true).unwrap();
    set(&mut r, "Z", "mine/a", json!({}));
    assert!(updates(&mut r, "Z").is_empty());

    r.set_reflect_to_self("Z", true).unwrap();
    set(&mut r, "Z", "mine/b", json!({}));
    let msgs = updates(&mut r, "Z");
    assert!(msgs[0].changed.contains_key("/h/Z/mine/b"));
}

#[test]
fn session_index_updates_ignore_reflect_to_self() {
    let mut r = reflector(&[("h", "Z")]);
    set(&mut r, "Z", "list", json!({}));
    r.subscribe("Z", "list", None, true).unwrap();
    r.insert_ordered_node("Z", "list", payload(json!({})), None).unwrap();
    let msgs = updates(&mut r, "Z");
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].changed.is_empty());
    assert_eq!(
        msgs[0].index_updates["/h/Z/list"],
        vec![IndexOp::Inserted { index: 0, name: "I0".into() }]
    );
}

#[test]
fn session_subscriptions_disabled() {
    let mut r = reflector(&[("h", "Z"), ("h", "X")]);
    r.subscribe("X", "*", None, true).unwrap();
    r.set_subscriptions_enabled("X", false).unwrap();
    set(&mut r, "Z", "a", json!({}));
    assert!(updates(&mut r, "X").is_empty());

    r.set_subscriptions_enabled("X", true).unwrap();
    set(&mut r, "Z", "a", json!({"v": 1}));
    assert_eq!(updates(&mut r, "X").len(), 1);
}

#[test]
fn session_duplicate_attach_rejected() {
    let mut r = reflector(&[("h", "Z")]);
    let err = r
        .attach(SessionId::from("Z"), Some("other"), Box::new(QueueOutbox::new()))
        .unwrap_err();
    assert!(matches!(err, ReflectError::LogicError(_)));
    assert_eq!(r.session_count(), 1);
}

#[test]
fn session_default_host_name() {
    let config = ReflectorConfig {
        host_name: "server1".into(),
        ..ReflectorConfig::default()
    };
    let mut r = Reflector::new(config);
    r.attach(SessionId::from("s"), None, Box::new(QueueOutbox::new()))
        .unwrap();
    assert_eq!(r.session_info("s").unwrap().path, "/server1/s");
}

#[test]
fn session_channel_outbox_delivers() {
    let mut r = reflector(&[("h", "Z")]);
    let (outbox, mut rx) = ChannelOutbox::new();
    r.attach(SessionId::from("X"), Some("h"), Box::new(outbox)).unwrap();
    r.subscribe("X", "*", None, true).unwrap();
    set(&mut r, "Z", "a", json!({"v": 1}));
    r.flush_all();

    let Ok(Outbound::Update(msg)) = rx.try_recv() else {
        panic!("expected an update on the channel");
    };
    assert!(msg.changed.contains_key("/h/Z/a"));
    // Channel outboxes can't be drained from the reflector side
    assert!(r.take_outgoing("X").is_empty());
}

#[test]
fn session_config_reload_applies_new_ceiling() {
    let (tx, rx) = watch::channel(ReflectorConfig::default());
    let mut r = Reflector::with_config_updates(ReflectorConfig::default(), rx);
    for id in ["Z", "X"] {
        r.attach(SessionId::from(id), Some("h"), Box::new(QueueOutbox::new()))
            .unwrap();
    }
    assert!(!r.apply_config_updates());

    tx.send(ReflectorConfig {
        max_update_message_items: 2,
        ..ReflectorConfig::default()
    })
    .unwrap();
    assert!(r.apply_config_updates());
    assert_eq!(r.config().max_update_message_items, 2);

    r.subscribe("X", "*", None, true).unwrap();
    for i in 0..5 {
        set(&mut r, "Z", &format!("n{i}"), json!({}));
    }
    assert_eq!(updates(&mut r, "X").len(), 3);
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl ReflectorHooks for Recorder {
    fn on_node_created(&mut self, path: &str, _payload: &Payload) {
        self.0.lock().unwrap().push(format!("created {path}"));
    }

    fn on_node_changed(&mut self, path: &str, old: Option<&Payload>, _new: &Payload) {
        let kind = if old.is_some() { "changed" } else { "initial" };
        self.0.lock().unwrap().push(format!("{kind} {path}"));
    }

    fn on_node_index_changed(&mut self, path: &str, op: &IndexOp) {
        self.0.lock().unwrap().push(format!("index {path} {op}"));
    }
}

#[test]
fn session_hooks_see_every_change() {
    let mut r = reflector(&[("h", "Z")]);
    let recorder = Recorder::default();
    r.set_hooks(Box::new(recorder.clone()));

    set(&mut r, "Z", "a", json!({}));
    set(&mut r, "Z", "a", json!({"v": 1}));
    r.insert_ordered_node("Z", "a", payload(json!({})), None).unwrap();

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "created /h/Z/a",
            "initial /h/Z/a",
            "changed /h/Z/a",
            "created /h/Z/a/I0",
            "initial /h/Z/a/I0",
            "index /h/Z/a i0:I0",
        ]
    );
}

#[test]
fn session_checksum_tracks_content() {
    let mut a = reflector(&[("h", "s")]);
    let mut b = reflector(&[("h", "s")]);
    set(&mut a, "s", "x/y", json!({"v": 1}));
    set(&mut b, "s", "x/y", json!({"v": 1}));
    assert_eq!(a.checksum("/h/s", 8).unwrap(), b.checksum("/h/s", 8).unwrap());

    set(&mut b, "s", "x/y", json!({"v": 2}));
    assert_ne!(a.checksum("/h/s", 8).unwrap(), b.checksum("/h/s", 8).unwrap());
    assert!(matches!(a.checksum("/nope", 1), Err(ReflectError::NotFound(_))));
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn dispatch_json_requests() {
    let mut r = reflector(&[("h", "Z"), ("h", "X")]);
    let sub: Command = serde_json::from_value(json!({
        "op": "subscribe",
        "pattern": "todo/*",
        "filter": null
    }))
    .unwrap();
    r.execute("X", sub).unwrap();

    let batch: Command = serde_json::from_value(json!({
        "op": "batch",
        "commands": [
            {"op": "set_node", "path": "todo/a", "payload": {"t": "milk"}},
            {"op": "set_node", "path": "todo/a", "payload": {"t": "eggs"}, "flags": {"dont_overwrite": true}},
            {"op": "set_node", "path": "todo/b", "payload": {"t": "bread"}}
        ]
    }))
    .unwrap();
    let CommandOutcome::Batch(results) = r.execute("Z", batch).unwrap() else {
        panic!("expected batch outcome");
    };
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(ReflectError::AccessDenied(_))));
    assert!(results[2].is_ok());

    // Flushed at the end of the request
    let out = r.take_outgoing("X");
    assert_eq!(out.len(), 1);
    let msg = out[0].as_update().unwrap();
    assert_eq!(msg.latest("/h/Z/todo/a").unwrap().get("t"), Some(&json!("milk")));
    assert!(msg.changed.contains_key("/h/Z/todo/b"));
}

#[test]
fn dispatch_unknown_bounces_after_pending_updates() {
    let mut r = reflector(&[("h", "Z")]);
    r.set_reflect_to_self("Z", true).unwrap();
    r.subscribe("Z", "*", None, true).unwrap();
    set(&mut r, "Z", "a", json!({}));

    let outcome = r.execute("Z", Command::Unknown { code: 77 }).unwrap();
    assert_eq!(outcome, CommandOutcome::Bounced { code: 77 });
    let out = r.take_outgoing("Z");
    assert_eq!(out.len(), 2);
    assert!(out[0].as_update().is_some());
    assert_eq!(out[1], Outbound::Unimplemented { code: 77 });
}

#[test]
fn dispatch_queries_and_ping() {
    let mut r = reflector(&[("h", "Z"), ("h", "X")]);
    r.subscribe("X", "todo/*", None, true).unwrap();
    set(&mut r, "Z", "todo/a", json!({"done": true}));
    set(&mut r, "Z", "todo/b", json!({"done": false}));

    // Nothing delivered yet, drop the finished ones
    let jettison = Command::JettisonResults {
        pattern: None,
        filter: Some(QueryFilter::field_eq("done", true)),
    };
    assert_eq!(r.execute("X", jettison).unwrap(), CommandOutcome::Applied { affected: 1 });
    let msgs = updates(&mut r, "X");
    assert_eq!(msgs.len(), 1);
    assert!(!msgs[0].changed.contains_key("/h/Z/todo/a"));
    assert!(msgs[0].changed.contains_key("/h/Z/todo/b"));

    let get: Command = serde_json::from_value(json!({"op": "get_data", "pattern": "todo/a"})).unwrap();
    assert_eq!(r.execute("X", get).unwrap(), CommandOutcome::Applied { affected: 1 });
    let ping: Command = serde_json::from_value(json!({"op": "ping", "payload": {"seq": 9}})).unwrap();
    r.execute("X", ping).unwrap();

    let out = r.take_outgoing("X");
    assert_eq!(out.len(), 2);
    assert!(out[0].as_update().unwrap().changed.contains_key("/h/Z/todo/a"));
    assert_eq!(out[1], Outbound::Pong { payload: Some(payload(json!({"seq": 9}))) });

    let unsub: Command = serde_json::from_value(json!({"op": "unsubscribe", "pattern": "todo*"})).unwrap();
    assert_eq!(r.execute("X", unsub).unwrap(), CommandOutcome::Applied { affected: 1 });
    assert_eq!(r.session_info("X").unwrap().subscription_count, 0);
}

#[test]
fn dispatch_unknown_session() {
    let mut r = reflector(&[]);
    let err = r
        .execute("nobody", Command::Unsubscribe { pattern: "x".into() })
        .unwrap_err();
    assert!(matches!(err, ReflectError::NotFound(_)));
}

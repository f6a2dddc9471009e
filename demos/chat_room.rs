// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chat-room walkthrough of the reflection core.
//!
//! Demonstrates:
//! 1. Attaching sessions on two hosts
//! 2. Wildcard and filtered subscriptions
//! 3. Posting, editing and deleting messages
//! 4. Ordered indexes (a pinned-message list)
//! 5. Supersede for chatty presence updates
//! 6. Detaching a session
//! 7. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=reflect_engine=debug cargo run --example chat_room
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use reflect_engine::{
    ChannelOutbox, Command, Outbound, Payload, QueryFilter, QueueOutbox, Reflector, ReflectorConfig, SessionId,
    SetNodeFlags,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           reflect-engine: Chat Room Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Attach sessions
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Attaching sessions...");
    let mut reflector = Reflector::new(ReflectorConfig::default());
    reflector.attach(SessionId::from("alice"), Some("hostA"), Box::new(QueueOutbox::new()))?;
    reflector.attach(SessionId::from("bob"), Some("hostB"), Box::new(QueueOutbox::new()))?;
    let (carol_outbox, mut carol_rx) = ChannelOutbox::new();
    reflector.attach(SessionId::from("carol"), Some("hostB"), Box::new(carol_outbox))?;
    for id in reflector.session_ids() {
        println!("   └─ {id}");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Subscribe
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📡 Subscribing...");
    reflector.subscribe("bob", "lobby/*", None, false)?;
    println!("   └─ bob   → lobby/*");
    reflector.subscribe("carol", "lobby/*", Some(QueryFilter::field_eq("urgent", "yes")), false)?;
    println!("   └─ carol → lobby/* where urgent == \"yes\"");

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Post, edit, delete
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Alice posts two messages...");
    let post = |text: &str, urgent: &str| Payload::new(json!({"text": text, "urgent": urgent}));
    reflector.set_node("alice", "lobby/m1", post("hi all", "no"), SetNodeFlags::default())?;
    reflector.set_node("alice", "lobby/m2", post("server on fire", "yes"), SetNodeFlags::default())?;
    reflector.flush_all();
    print_outgoing(&mut reflector, "bob");
    print_channel("carol", &mut carol_rx);

    println!("\n✏️  Alice calms down...");
    reflector.set_node("alice", "lobby/m2", post("never mind", "no"), SetNodeFlags::default())?;
    reflector.remove_nodes("alice", "lobby/m1", None, false)?;
    reflector.flush_all();
    print_outgoing(&mut reflector, "bob");
    print_channel("carol", &mut carol_rx);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Ordered index
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📌 Pinned list (ordered index)...");
    reflector.subscribe("bob", "pins", None, true)?;
    reflector.set_node("alice", "pins", Payload::empty(), SetNodeFlags::default())?;
    reflector.insert_ordered_node("alice", "pins", post("rules", "no"), None)?;
    reflector.insert_ordered_node("alice", "pins", post("faq", "no"), None)?;
    reflector.reorder_node("alice", "pins/I1", Some("I0"))?;
    reflector.flush_all();
    print_outgoing(&mut reflector, "bob");

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Supersede
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🖱️  Alice moves her cursor 20 times (supersede)...");
    reflector.subscribe("bob", "cursor", None, true)?;
    for x in 0..20 {
        let cursor = Payload::new(json!({"x": x}));
        let command = Command::SetNode {
            path: "cursor".into(),
            payload: cursor,
            flags: SetNodeFlags::default().with_supersede(),
        };
        reflector.execute("alice", command)?;
    }
    print_outgoing(&mut reflector, "bob");

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Detach
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n👋 Alice leaves...");
    println!("   └─ checksum before: {}", reflector.checksum("/hostA/alice", 4)?);
    reflector.detach("alice")?;
    reflector.flush_all();
    print_outgoing(&mut reflector, "bob");
    println!("   └─ sessions left: {}", reflector.session_count());
    println!("   └─ nodes left: {}", reflector.node_count());

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    let stats = reflector.pool_stats();
    println!("\n🧮 Subscriber-set pool: {} cached, {} hits, {} misses", stats.cached_sets, stats.hits, stats.misses);
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn print_outgoing(reflector: &mut Reflector, session: &str) {
    for out in reflector.take_outgoing(session) {
        print_outbound(session, &out);
    }
}

fn print_channel(session: &str, rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>) {
    while let Ok(out) = rx.try_recv() {
        print_outbound(session, &out);
    }
}

fn print_outbound(session: &str, out: &Outbound) {
    match out {
        Outbound::Update(msg) => {
            for (path, payloads) in &msg.changed {
                for p in payloads {
                    println!("   └─ {session}: changed {path} → {}", p.value());
                }
            }
            for path in &msg.removed {
                println!("   └─ {session}: removed {path}");
            }
            for (path, ops) in &msg.index_updates {
                let tokens: Vec<String> = ops.iter().map(ToString::to_string).collect();
                println!("   └─ {session}: index {path} [{}]", tokens.join(" "));
            }
        }
        Outbound::Unimplemented { code } => println!("   └─ {session}: unimplemented {code}"),
        Outbound::Pong { payload } => match payload {
            Some(p) => println!("   └─ {session}: pong {}", p.value()),
            None => println!("   └─ {session}: pong"),
        },
    }
}

/// Dump all captured metrics
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();
    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let rendered = match value {
            DebugValue::Counter(v) => format!("{v}"),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={sum:.6}", samples.len())
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }
    lines.sort();
    for line in lines {
        println!("   └─ {line}");
    }
}

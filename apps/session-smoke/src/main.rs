mod logging;

use std::{sync::Arc, time::Duration};

use session_client::SessionClient;
use session_core::{
    RemotePhase, RoomAggregator, RoomEvent, RoomSnapshot, SasEmoji, TimelineView,
    testkit::{FakeConnection, FakeSas, FakeVerification, FakeVerifier},
};
use session_platform::InMemoryCredentialStore;
use tracing::{error, info};

fn event(sender: &str, body: &str, timestamp_ms: u64) -> RoomEvent {
    RoomEvent {
        event_id: None,
        sender: sender.to_owned(),
        body: body.to_owned(),
        timestamp_ms,
    }
}

#[tokio::main]
async fn main() {
    logging::init();

    let conn = Arc::new(FakeConnection::new());
    conn.set_room(RoomSnapshot {
        room_id: "!rust:example.org".into(),
        name: Some("Rust".into()),
        avatar: Some("mxc://example.org/rustacean".into()),
        events: vec![event("@bob:example.org", "anyone around?", 1_731_000_000_000)],
    });
    conn.set_room(RoomSnapshot {
        room_id: "!ops:example.org".into(),
        name: None,
        avatar: None,
        events: Vec::new(),
    });

    let client = SessionClient::new(Arc::clone(&conn), InMemoryCredentialStore::default());
    let session = match client.login("https://example.org", "alice", "correct-horse").await {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "login failed");
            std::process::exit(1);
        }
    };
    info!(user = %session.user_id, device = %session.device_id, "logged in");

    let aggregator = Arc::new(RoomAggregator::new(client.connection()));
    aggregator.bootstrap();
    client.register_room_event_sink({
        let aggregator = Arc::clone(&aggregator);
        move |event, room| aggregator.on_event(event, Some(room))
    });

    let timeline = TimelineView::new(client.connection());
    timeline.start_observing();
    timeline.focus("!rust:example.org");

    conn.push_room_event(
        "!rust:example.org",
        event("@bob:example.org", "the borrow checker says hi", 1_731_000_060_000),
        false,
    );

    for summary in aggregator.sorted_by_recency() {
        info!(
            room = %summary.display_name,
            last = %summary.last_message,
            ts = summary.timestamp_ms,
            "room summary"
        );
    }
    info!(buffered = timeline.events().len(), "timeline buffer for focused room");

    // Device verification round trip against scripted collaborator objects.
    let verifier = Arc::new(FakeVerifier::new());
    let request = Arc::new(FakeVerification::new("smoke-flow", "DEVICE2"));
    conn.push_verification(request.clone());
    client.verification().accept().await;
    request.set_verifier(Arc::clone(&verifier));
    request.set_remote_phase(RemotePhase::Started);
    verifier.emit_code(Arc::new(FakeSas::new(
        vec![
            SasEmoji {
                symbol: "🐱".into(),
                description: "Cat".into(),
            },
            SasEmoji {
                symbol: "🔒".into(),
                description: "Lock".into(),
            },
        ],
        Some([1234, 5678, 9012]),
    )));

    let snapshot = client.verification().snapshot();
    let code: String = snapshot
        .transcript
        .iter()
        .flat_map(|t| t.emojis.iter())
        .map(|e| e.symbol.as_str())
        .collect();
    info!(phase = ?snapshot.phase, %code, "comparison code on display");

    client.verification().confirm_match().await;
    verifier.complete(Ok(()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    info!(phase = ?client.verification().phase(), "verification settled");

    client.stop().await;
    info!("smoke run complete");
}

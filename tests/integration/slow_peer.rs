// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! A peer that stops reading must not stall everyone else.
//!
//! P2 connects and never reads. P1 keeps sending large messages until P2's
//! socket buffers fill and a write to it blocks. That write is abandoned
//! after the send timeout, P2 is dropped, and every round trip for P1 and P3
//! stays bounded throughout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use broadcast_cli::client::RelayClient;
use broadcast_proto::{PeerId, WS_PATH};
use broadcast_relay::config::RelayConfig;
use broadcast_relay::relay::{self, RelayState};
use tokio_tungstenite::MaybeTlsStream;

const SEND_TIMEOUT: Duration = Duration::from_millis(500);
const PAYLOAD_LEN: usize = 32 * 1024;
const MAX_ROUNDS: usize = 4_000;
/// Upper bound on a single round trip: one abandoned write plus slack.
const ROUND_TRIP_BOUND: Duration = Duration::from_secs(3);

async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn recv(client: &mut RelayClient) -> String {
    tokio::time::timeout(ROUND_TRIP_BOUND, client.recv())
        .await
        .expect("round trip exceeded bound")
        .expect("connection closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_peer_is_dropped_and_others_keep_flowing() {
    let state = Arc::new(RelayState::with_config(RelayConfig {
        send_timeout: SEND_TIMEOUT,
        ..RelayConfig::default()
    }));
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    let url = format!("ws://{addr}{WS_PATH}");

    let mut p1 = RelayClient::connect(&url, Duration::from_secs(5)).await.unwrap();
    let p1_id = PeerId::from(p1.local_addr().unwrap());

    // Raw socket that is held open but never polled.
    let (stalled, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let p2_id = match stalled.get_ref() {
        MaybeTlsStream::Plain(tcp) => PeerId::from(tcp.local_addr().unwrap()),
        _ => unreachable!("test server is plain TCP"),
    };

    let mut p3 = RelayClient::connect(&url, Duration::from_secs(5)).await.unwrap();
    wait_until(|| state.registry().len() == 3).await;
    assert!(state.registry().contains(&p2_id));

    let payload = "x".repeat(PAYLOAD_LEN);
    let expected = format!("[{p1_id}]: {payload}");
    let mut slowest = Duration::ZERO;

    for _ in 0..MAX_ROUNDS {
        if !state.registry().contains(&p2_id) {
            break;
        }
        let started = Instant::now();
        p1.send(&payload).await.unwrap();
        assert_eq!(recv(&mut p1).await, expected);
        assert_eq!(recv(&mut p3).await, expected);
        slowest = slowest.max(started.elapsed());
    }

    assert!(
        !state.registry().contains(&p2_id),
        "stalled peer was never dropped"
    );
    assert!(slowest < ROUND_TRIP_BOUND, "slowest round trip {slowest:?}");
    assert_eq!(state.registry().len(), 2);

    // Traffic keeps flowing once the stalled peer is gone.
    p3.send("still here").await.unwrap();
    let p3_id = PeerId::from(p3.local_addr().unwrap());
    assert_eq!(recv(&mut p1).await, format!("[{p3_id}]: still here"));
    assert_eq!(recv(&mut p3).await, format!("[{p3_id}]: still here"));

    drop(stalled);
}

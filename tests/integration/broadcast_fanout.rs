// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! End-to-end fan-out tests.
//!
//! Starts an in-process relay on an OS-assigned port and drives it with real
//! [`RelayClient`]s. Validates:
//! - every peer, the sender included, receives `"[<sender>]: <payload>"`
//! - a cleanly disconnected peer is dropped without disturbing the others
//! - a broadcast with nobody connected is a harmless no-op
//! - empty payloads are still wrapped and delivered

use std::sync::Arc;
use std::time::Duration;

use broadcast_cli::client::RelayClient;
use broadcast_proto::{PeerId, WS_PATH};
use broadcast_relay::config::RelayConfig;
use broadcast_relay::relay::{self, RelayState};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    url: String,
    state: Arc<RelayState>,
}

impl Harness {
    async fn start() -> Self {
        let state = Arc::new(RelayState::with_config(RelayConfig {
            send_timeout: Duration::from_millis(500),
            ..RelayConfig::default()
        }));
        let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
            .await
            .expect("failed to start test server");
        Self {
            url: format!("ws://{addr}{WS_PATH}"),
            state,
        }
    }

    /// Connects a client and waits until the relay has registered it.
    async fn connect(&self) -> (RelayClient, PeerId) {
        let client = RelayClient::connect(&self.url, WAIT).await.unwrap();
        let id = PeerId::from(client.local_addr().unwrap());
        self.wait_until(|state| state.registry().contains(&id)).await;
        (client, id)
    }

    async fn wait_until(&self, cond: impl Fn(&RelayState) -> bool) {
        tokio::time::timeout(WAIT, async {
            while !cond(&self.state) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

async fn recv(client: &mut RelayClient) -> String {
    tokio::time::timeout(WAIT, client.recv())
        .await
        .expect("timed out waiting for message")
        .expect("connection closed")
}

async fn assert_silent(client: &mut RelayClient) {
    let got = tokio::time::timeout(Duration::from_millis(200), client.recv()).await;
    assert!(got.is_err(), "unexpected message: {got:?}");
}

#[tokio::test]
async fn message_reaches_every_peer_including_sender() {
    let harness = Harness::start().await;
    let (mut p1, p1_id) = harness.connect().await;
    let (mut p2, _) = harness.connect().await;

    p1.send("hello").await.unwrap();

    let expected = format!("[{p1_id}]: hello");
    assert_eq!(recv(&mut p1).await, expected);
    assert_eq!(recv(&mut p2).await, expected);
}

#[tokio::test]
async fn disconnected_peer_is_dropped_and_others_keep_working() {
    let harness = Harness::start().await;
    let (mut p1, p1_id) = harness.connect().await;
    let (p2, p2_id) = harness.connect().await;

    let (mut p2_sender, _p2_receiver) = p2.into_split();
    p2_sender.close().await;
    harness
        .wait_until(|state| !state.registry().contains(&p2_id))
        .await;

    p1.send("anyone left?").await.unwrap();
    assert_eq!(recv(&mut p1).await, format!("[{p1_id}]: anyone left?"));
    assert_eq!(harness.state.registry().len(), 1);
}

#[tokio::test]
async fn broadcast_with_nobody_connected_is_a_no_op() {
    let harness = Harness::start().await;

    let report = harness
        .state
        .dispatch(&PeerId::new("127.0.0.1:9"), "into the void")
        .await;

    assert_eq!(report.delivered, 0);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn empty_payload_is_wrapped_and_delivered() {
    let harness = Harness::start().await;
    let (mut p1, p1_id) = harness.connect().await;
    let (mut p2, _) = harness.connect().await;

    p1.send("").await.unwrap();

    let expected = format!("[{p1_id}]: ");
    assert_eq!(recv(&mut p1).await, expected);
    assert_eq!(recv(&mut p2).await, expected);
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let harness = Harness::start().await;
    let (mut p1, p1_id) = harness.connect().await;
    let (mut p2, _) = harness.connect().await;

    for i in 0..20 {
        p1.send(&format!("m{i}")).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(recv(&mut p2).await, format!("[{p1_id}]: m{i}"));
    }
    assert_silent(&mut p2).await;
}

#[tokio::test]
async fn shutdown_closes_every_client() {
    let harness = Harness::start().await;
    let (mut p1, _) = harness.connect().await;
    let (mut p2, _) = harness.connect().await;

    harness.state.close_all_connections().await;

    assert!(tokio::time::timeout(WAIT, p1.recv()).await.unwrap().is_none());
    assert!(tokio::time::timeout(WAIT, p2.recv()).await.unwrap().is_none());
    harness.wait_until(|state| state.registry().is_empty()).await;
}

//! End-to-end scenarios spanning multiple mesh-net modules together,
//! as opposed to the single-module unit tests each module carries inline.

use mesh_core::wire::{self, HeaderFields, MessageType, FLAG_IS_BROADCAST};
use mesh_net::dedup::DedupState;
use mesh_net::handshake::HandshakeManager;
use mesh_net::session::Session;
use mesh_net::storeforward::StoreForwardCache;
use mesh_net::transport::{MockNetwork, Transport, TransportEvent};

fn broadcast_fields(now_ms: u64) -> HeaderFields {
    HeaderFields {
        message_type: MessageType::Text as u8,
        flags: FLAG_IS_BROADCAST,
        hop_count: 0,
        max_hops: 7,
        message_id: HeaderFields::new_message_id(),
        timestamp_ms: now_ms,
        expires_at_ms: now_ms + 60_000,
        payload_length: 5,
        fragment_index: 0,
        fragment_total: 1,
    }
}

/// Topology A-B-C, A and C each only linked to B. A broadcasts; C should
/// receive exactly one copy via B, and a duplicate arrival at C is dropped.
#[tokio::test]
async fn broadcast_relay_reaches_leaf_exactly_once() {
    let network = MockNetwork::new();
    let (a, _a_rx) = network.create_transport("a");
    let (b, mut b_rx) = network.create_transport("b");
    let (_c, mut c_rx) = network.create_transport("c");

    let fields = broadcast_fields(0);
    let frame = wire::serialize(&fields, b"hello").unwrap();

    a.send("b", frame.clone()).await.unwrap();

    let relayed_by_b = match b_rx.recv().await.unwrap() {
        TransportEvent::Message { peer_id, data } => {
            assert_eq!(peer_id, "a");
            data
        }
        other => panic!("unexpected event: {other:?}"),
    };

    let mut dedup = DedupState::new(4096, 4, 128, 60_000);
    let parsed = wire::deserialize(&relayed_by_b).unwrap();
    assert!(!dedup.check_and_mark(parsed.header.message_id, 0));

    b.broadcast(relayed_by_b.clone()).await.unwrap();

    match c_rx.recv().await.unwrap() {
        TransportEvent::Message { data, .. } => {
            let parsed_at_c = wire::deserialize(&data).unwrap();
            assert!(!dedup.is_duplicate(&parsed_at_c.header.message_id, 0));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // A second copy of the same frame arrives at C — dedup drops it.
    b.broadcast(relayed_by_b).await.unwrap();
    match c_rx.recv().await.unwrap() {
        TransportEvent::Message { data, .. } => {
            let parsed_again = wire::deserialize(&data).unwrap();
            assert!(dedup.is_duplicate(&parsed_again.header.message_id, 0));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Full three-message handshake across two nodes over the mock transport,
/// followed by session cross-talk: a third node cannot decrypt traffic
/// between the original pair.
#[tokio::test]
async fn handshake_then_session_is_isolated_from_third_party() {
    let mut initiator = HandshakeManager::new(10_000);
    let mut responder = HandshakeManager::new(10_000);
    let responder_static = [1u8; 32];

    let msg1 = initiator.initiate("responder", 0).unwrap();
    let msg2 = responder.on_init("initiator", &msg1, &responder_static, 0).unwrap();
    let (msg3, initiator_result) = initiator.on_response("responder", &msg2, 10).unwrap();
    let responder_result = responder.on_final("initiator", &msg3, 20).unwrap();

    let mut session_a = Session::new(
        "responder".to_string(),
        initiator_result.send_key,
        initiator_result.recv_key,
        0,
    );
    let mut session_b = Session::new(
        "initiator".to_string(),
        responder_result.send_key,
        responder_result.recv_key,
        0,
    );

    let ciphertext = session_a.encrypt(b"", b"hello, b", 0, 86_400_000, 1_000_000).unwrap();
    assert_eq!(
        session_b.decrypt(b"", &ciphertext).unwrap(),
        Some(b"hello, b".to_vec())
    );

    // A third, unrelated session pair must not be able to decrypt this.
    let mut eve_initiator = HandshakeManager::new(10_000);
    let mut eve_responder = HandshakeManager::new(10_000);
    let eve_msg1 = eve_initiator.initiate("responder", 100).unwrap();
    let eve_msg2 = eve_responder.on_init("eve", &eve_msg1, &[2u8; 32], 100).unwrap();
    let (_eve_msg3, eve_result) = eve_initiator.on_response("responder", &eve_msg2, 110).unwrap();
    let mut eve_session = Session::new("responder".to_string(), eve_result.send_key, eve_result.recv_key, 100);

    assert_eq!(eve_session.decrypt(b"", &ciphertext).unwrap(), None);
}

/// Caching 15 messages for one recipient with a per-recipient cap of 10
/// leaves exactly the 5th..15th payloads, then reconnect delivery drains
/// the queue.
#[tokio::test(flavor = "multi_thread")]
async fn store_and_forward_drains_on_reconnect() {
    let mut cache = StoreForwardCache::new(10, 1_000, 3_600_000);
    for i in 0..15u8 {
        cache.cache_for_offline_peer("p", vec![i], None, 0).unwrap();
    }
    assert_eq!(cache.len_for("p"), 10);

    let network = MockNetwork::new();
    let (sender, _rx) = network.create_transport("sender");
    let (_recipient, mut recipient_rx) = network.create_transport("p");

    let delivered = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let delivered_clone = delivered.clone();
    let sender_ref = &sender;

    let failures = cache.deliver_cached_messages("p", move |entry| {
        let payload = entry.payload.clone();
        let sender = sender_ref;
        let result = futures_block_send(sender, "p", payload.clone());
        if result {
            delivered_clone.lock().unwrap().push(payload[0]);
        }
        result
    });

    assert_eq!(failures, 0);
    assert_eq!(cache.len_for("p"), 0);

    let mut received = Vec::new();
    for _ in 0..10 {
        match recipient_rx.recv().await.unwrap() {
            TransportEvent::Message { data, .. } => received.push(data[0]),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    received.sort();
    assert_eq!(received, (5..15).collect::<Vec<u8>>());
}

// `deliver_cached_messages` takes a synchronous closure; bridge to the
// async mock transport with a blocking handle since this is test-only code.
fn futures_block_send(transport: &mesh_net::transport::MockTransport, peer_id: &str, bytes: Vec<u8>) -> bool {
    tokio::task::block_in_place(|| {
        tokio::runtime::Handle::current().block_on(transport.send(peer_id, bytes)).is_ok()
    })
}

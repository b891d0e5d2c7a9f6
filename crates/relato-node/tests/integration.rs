//! Integration tests for the Relato node
//!
//! These tests exercise the full flows against an in-memory store, the
//! mock remote service and real loopback TCP connections, so no external
//! service is required.

use std::sync::Arc;

use chrono::Utc;
use relato_core::envelope;
use relato_core::passphrase::mock::QueuePassphraseProvider;
use relato_core::{
    Error, IncidentDraft, Origin, PassphraseCache, PeerAddress, PeerClient, PeerEvent, PeerServer,
    ProtocolError, SyncState,
};
use relato_node::remote::mock::{MockBehavior, MockRemoteService};
use relato_node::{FsMediaStore, IncidentStore, SyncCoordinator};
use tempfile::TempDir;

fn draft(description: &str) -> IncidentDraft {
    IncidentDraft {
        description: description.to_string(),
        symbolic_location: Some("Market square".to_string()),
        latitude: -8.839,
        longitude: 13.289,
        timestamp: Utc::now(),
        urgent: false,
        photo_ref: None,
        video_ref: None,
    }
}

/// Capture while offline, then drain once connectivity returns.
#[tokio::test]
async fn test_capture_offline_then_sync() {
    let store = Arc::new(IncidentStore::open_in_memory().unwrap());
    let service = MockRemoteService::unreachable();
    let coordinator = SyncCoordinator::new(Arc::clone(&store), service);

    // Capture three reports with the service down.
    for i in 0..3 {
        store
            .create(&draft(&format!("report {i}")), Origin::AuthoredLocal)
            .unwrap();
    }
    coordinator.drain_pending().await.unwrap();
    assert_eq!(store.count_pending_sync().unwrap(), 3);
    assert!(!coordinator.is_network_available());

    // Network returns; everything drains oldest first.
    coordinator.set_network_available(true);
    let report = coordinator.drain_pending().await.unwrap();

    assert_eq!(report.synced, 3);
    assert_eq!(store.count_pending_sync().unwrap(), 0);
    for incident in store.list_all().unwrap() {
        assert_eq!(incident.sync_state, SyncState::Synced);
        assert!(incident.remote_id.is_some());
    }
}

/// Records received over the peer link must never reach the remote service,
/// no matter how many drain passes run.
#[tokio::test]
async fn test_peer_received_records_never_sync() {
    let store = Arc::new(IncidentStore::open_in_memory().unwrap());
    let service = MockRemoteService::accepting();

    store.create(&draft("my own report"), Origin::AuthoredLocal).unwrap();
    let received = store
        .create(&draft("relayed by neighbor"), Origin::ReceivedFromPeer)
        .unwrap();

    let coordinator = SyncCoordinator::new(Arc::clone(&store), service);
    coordinator.drain_pending().await.unwrap();
    coordinator.drain_pending().await.unwrap();

    let submitted = coordinator_submissions(&coordinator);
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].description, "my own report");

    let reloaded = store.get(received.id).unwrap().unwrap();
    assert_eq!(reloaded.sync_state, SyncState::NeverSync);
    assert!(reloaded.remote_id.is_none());
}

fn coordinator_submissions(
    coordinator: &SyncCoordinator<MockRemoteService>,
) -> Vec<relato_core::Incident> {
    // The coordinator owns the service; reach through for inspection.
    coordinator.service().submissions()
}

/// A full exchange over loopback TCP: encode on one node, send, decode and
/// store on the other, with passphrase encryption in the middle.
#[tokio::test]
async fn test_encrypted_peer_exchange_end_to_end() {
    let sender_dir = TempDir::new().unwrap();
    let receiver_dir = TempDir::new().unwrap();

    let sender_store = IncidentStore::open(&sender_dir.path().join("incidents.db")).unwrap();
    let sender_media = FsMediaStore::open(&sender_dir.path().join("media")).unwrap();
    let receiver_store = IncidentStore::open(&receiver_dir.path().join("incidents.db")).unwrap();
    let receiver_media = FsMediaStore::open(&receiver_dir.path().join("media")).unwrap();

    let mut urgent = draft("Flooding under the bridge");
    urgent.urgent = true;
    let incident = sender_store.create(&urgent, Origin::AuthoredLocal).unwrap();

    // Receiver side: listen on an ephemeral port.
    let (mut server, mut events) = PeerServer::start(0).await.unwrap();
    let addr = PeerAddress::new(format!("127.0.0.1:{}", server.local_addr().port()));

    // Sender side: encrypt, connect, send once.
    let message = envelope::encode(&incident, Some("rainy season"), &sender_media).unwrap();
    let mut client = PeerClient::connect(&addr).await.unwrap();
    client.send(&message).await.unwrap();
    let new_count = sender_store.increment_share_count(incident.id).unwrap();
    assert_eq!(new_count, 1);

    // Receiver side: decode with the shared passphrase and store.
    let wire = match events.recv().await.unwrap() {
        PeerEvent::MessageReceived(msg) => msg,
        other => panic!("unexpected event: {other:?}"),
    };
    // Ciphertext on the wire, not JSON.
    assert!(!wire.contains("Flooding"));

    let provider = QueuePassphraseProvider::fixed("rainy season");
    let mut cache = PassphraseCache::new();
    let received_draft = envelope::decode(&wire, &mut cache, &provider, &receiver_media)
        .await
        .unwrap();
    let stored = receiver_store
        .create(&received_draft, Origin::ReceivedFromPeer)
        .unwrap();

    assert_eq!(stored.description, "Flooding under the bridge");
    assert!(stored.urgent);
    assert_eq!(stored.sync_state, SyncState::NeverSync);
    // Receiver assigns its own identity.
    assert_eq!(stored.origin, Origin::ReceivedFromPeer);

    server.stop().await;
}

/// Two wrong passphrases in a row: the message is dropped and no record is
/// created on the receiving side.
#[tokio::test]
async fn test_wrong_passphrase_twice_creates_no_record() {
    let dir = TempDir::new().unwrap();
    let store = IncidentStore::open(&dir.path().join("incidents.db")).unwrap();
    let media = FsMediaStore::open(&dir.path().join("media")).unwrap();

    let incident = store
        .create(&draft("only for trusted peers"), Origin::AuthoredLocal)
        .unwrap();
    let wire = envelope::encode(&incident, Some("the real passphrase"), &media).unwrap();

    let provider = QueuePassphraseProvider::new([
        Some("guess one".to_string()),
        Some("guess two".to_string()),
    ]);
    let mut cache = PassphraseCache::new();

    let before = store.list_all().unwrap().len();
    let err = envelope::decode(&wire, &mut cache, &provider, &media)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::UndecodableMessage)
    ));
    assert_eq!(provider.requests_served(), 2);
    assert_eq!(store.list_all().unwrap().len(), before);
}

/// The share counter moves exactly once per confirmed send and not at all
/// when the send fails.
#[tokio::test]
async fn test_share_count_tracks_confirmed_sends_only() {
    let dir = TempDir::new().unwrap();
    let store = IncidentStore::open(&dir.path().join("incidents.db")).unwrap();
    let media = FsMediaStore::open(&dir.path().join("media")).unwrap();

    let incident = store.create(&draft("shared widely"), Origin::AuthoredLocal).unwrap();
    let message = envelope::encode(&incident, None, &media).unwrap();

    let (mut server, mut events) = PeerServer::start(0).await.unwrap();
    let addr = PeerAddress::new(format!("127.0.0.1:{}", server.local_addr().port()));

    // Two confirmed sends.
    for _ in 0..2 {
        let mut client = PeerClient::connect(&addr).await.unwrap();
        client.send(&message).await.unwrap();
        events.recv().await.unwrap();
        store.increment_share_count(incident.id).unwrap();
    }
    server.stop().await;

    // A failed send: the port is closed now, so no confirmation and no
    // counter movement.
    assert!(PeerClient::connect(&addr).await.is_err());

    let reloaded = store.get(incident.id).unwrap().unwrap();
    assert_eq!(reloaded.share_count, 2);
}

/// Plaintext peer exchange for peers with no shared passphrase.
#[tokio::test]
async fn test_plaintext_peer_exchange() {
    let dir = TempDir::new().unwrap();
    let store = IncidentStore::open(&dir.path().join("incidents.db")).unwrap();
    let media = FsMediaStore::open(&dir.path().join("media")).unwrap();

    let incident = store
        .create(&draft("open broadcast"), Origin::AuthoredLocal)
        .unwrap();
    let wire = envelope::encode(&incident, None, &media).unwrap();

    // No provider interaction for plaintext.
    let provider = QueuePassphraseProvider::new([]);
    let mut cache = PassphraseCache::new();
    let received = envelope::decode(&wire, &mut cache, &provider, &media)
        .await
        .unwrap();

    assert_eq!(received.description, "open broadcast");
    assert_eq!(provider.requests_served(), 0);
}

/// Rejected submissions stay pending and later passes retry them.
#[tokio::test]
async fn test_rejected_then_accepted_on_retry() {
    let store = Arc::new(IncidentStore::open_in_memory().unwrap());
    let service = MockRemoteService::new(MockBehavior::Reject("maintenance window".to_string()));
    let coordinator = SyncCoordinator::new(Arc::clone(&store), service);

    let incident = store.create(&draft("persistent"), Origin::AuthoredLocal).unwrap();

    let first = coordinator.drain_pending().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(store.count_pending_sync().unwrap(), 1);

    coordinator.service().set_behavior(MockBehavior::Accept);
    let second = coordinator.drain_pending().await.unwrap();
    assert_eq!(second.synced, 1);

    let reloaded = store.get(incident.id).unwrap().unwrap();
    assert_eq!(reloaded.sync_state, SyncState::Synced);
}

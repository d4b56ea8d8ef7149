//! spec.md §7 "Session destruction always emits peer-closed": closing a
//! session must notify every configured transceiver's media source, even
//! one that never reached `ConnectionReady`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use kvs_webrtc_endpoint::certificate::EndpointCertificate;
use kvs_webrtc_endpoint::config::EndpointConfig;
use kvs_webrtc_endpoint::dtls_bridge::Role;
use kvs_webrtc_endpoint::media_source::MediaSourceCallbacks;
use kvs_webrtc_endpoint::session::transceiver::Kind;
use kvs_webrtc_endpoint::session::{queue, PeerSession, SessionState};

#[derive(Default)]
struct CountingCallbacks {
    peer_ready: AtomicUsize,
    peer_closed: AtomicUsize,
    picture_loss: AtomicUsize,
    bitrate_updates: AtomicUsize,
}

#[async_trait]
impl MediaSourceCallbacks for CountingCallbacks {
    async fn on_peer_ready(&self, _kind: Kind) {
        self.peer_ready.fetch_add(1, Ordering::SeqCst);
    }
    async fn on_peer_closed(&self, _kind: Kind) {
        self.peer_closed.fetch_add(1, Ordering::SeqCst);
    }
    async fn on_bitrate_modified(&self, _kind: Kind, _target_bps: u32) {
        self.bitrate_updates.fetch_add(1, Ordering::SeqCst);
    }
    async fn on_picture_loss(&self, _kind: Kind) {
        self.picture_loss.fetch_add(1, Ordering::SeqCst);
    }
}

fn new_session_with_callbacks(cb: Arc<CountingCallbacks>) -> PeerSession {
    let cert = Arc::new(EndpointCertificate::generate().expect("cert generation"));
    let (tx, _rx) = queue::bounded(queue::DEFAULT_CAPACITY);
    let mut session = PeerSession::new(
        "viewer-1".to_owned(),
        Role::Server,
        cert,
        &EndpointConfig::default(),
        tx,
    );
    for kind in [Kind::Video, Kind::Audio] {
        session.init_transceiver(kind, cb.clone()).expect("transceiver exists");
    }
    session
}

#[tokio::test]
async fn closing_a_session_before_it_ever_connects_still_notifies_every_transceiver() {
    let callbacks = Arc::new(CountingCallbacks::default());
    let mut session = new_session_with_callbacks(callbacks.clone());
    assert_eq!(session.state(), SessionState::Inited);

    session.close().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(callbacks.peer_closed.load(Ordering::SeqCst), 2);
    assert_eq!(callbacks.peer_ready.load(Ordering::SeqCst), 0);
}

//! Per-peer request queue (spec.md §4.7 "bounded request queue, capacity
//! 10"). Grounded on the bounded message-queue shape (fixed capacity,
//! explicit full/empty results rather than blocking indefinitely),
//! reimplemented over `tokio::sync::mpsc`.

use tokio::sync::mpsc;

use crate::error::{Error, Result};

pub const DEFAULT_CAPACITY: usize = 10;

/// One unit of work handed from the signaling/ICE/DTLS callbacks to the
/// orchestrator task (spec.md §4.7).
#[derive(Debug)]
pub enum PeerRequest {
    /// Wire-format (escaped-newline) SDP text, as received over signaling
    /// (spec.md §6). Parsed by `PeerSession::set_remote_description`.
    RemoteDescription(String),
    RemoteIceCandidate(crate::signaling::IceCandidateInit),
    WriteFrame(crate::media_source::Frame),
    /// Forwarded from `IceTransport::on_connection_state_change` (spec.md
    /// §4.1 "Failure semantics"). The callback itself is synchronous, so it
    /// enqueues here rather than acting directly.
    IceConnectionStateChanged(ice::state::ConnectionState),
    Close,
}

/// Sender half; cloned into every task that can enqueue work for a session.
#[derive(Clone)]
pub struct RequestQueueSender {
    tx: mpsc::Sender<PeerRequest>,
}

impl RequestQueueSender {
    /// Non-blocking enqueue (spec.md §4.7 "a full queue rejects further
    /// frames rather than blocking the media source").
    pub fn try_send(&self, request: PeerRequest) -> Result<()> {
        self.tx
            .try_send(request)
            .map_err(|_| Error::ErrRequestQueueFull)
    }
}

pub struct RequestQueueReceiver {
    rx: mpsc::Receiver<PeerRequest>,
}

impl RequestQueueReceiver {
    pub async fn recv(&mut self) -> Option<PeerRequest> {
        self.rx.recv().await
    }
}

/// Creates a bounded request queue at the spec's fixed capacity.
pub fn bounded(capacity: usize) -> (RequestQueueSender, RequestQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RequestQueueSender { tx }, RequestQueueReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_rejects_further_requests() {
        let (tx, _rx) = bounded(1);
        tx.try_send(PeerRequest::Close).unwrap();
        let err = tx.try_send(PeerRequest::Close).unwrap_err();
        assert!(matches!(err, Error::ErrRequestQueueFull));
    }

    #[tokio::test]
    async fn receiver_drains_in_order() {
        let (tx, mut rx) = bounded(DEFAULT_CAPACITY);
        tx.try_send(PeerRequest::RemoteDescription("a".to_string())).unwrap();
        tx.try_send(PeerRequest::RemoteDescription("b".to_string())).unwrap();

        match rx.recv().await {
            Some(PeerRequest::RemoteDescription(s)) => assert_eq!(s, "a"),
            other => panic!("unexpected: {other:?}"),
        }
        match rx.recv().await {
            Some(PeerRequest::RemoteDescription(s)) => assert_eq!(s, "b"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

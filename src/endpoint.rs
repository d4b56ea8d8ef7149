//! Process-wide endpoint (spec.md §3, §6): owns the device certificate,
//! configuration, and the table of active peer sessions. Grounded on the
//! teacher's `webrtc::api::API`/`RTCPeerConnection` split, collapsed here
//! into a single type since this crate has no per-connection public object
//! beyond the session handle the caller addresses by remote client id.

use std::collections::HashMap;
use std::sync::Arc;

use ice::url::Url;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::certificate::EndpointCertificate;
use crate::config::EndpointConfig;
use crate::dtls_bridge::Role;
use crate::error::{Error, Result};
use crate::media_source::{Frame, MediaSink, MediaSourceCallbacks};
use crate::session::transceiver::Kind;
use crate::session::queue::{self, PeerRequest, RequestQueueReceiver, RequestQueueSender};
use crate::session::{orchestrator, PeerSession};
use crate::signaling::{IceCandidateInit, SignalingClient};

struct SessionHandle {
    queue_tx: RequestQueueSender,
    task: JoinHandle<()>,
}

/// The embedding application's single entry point (spec.md §6). One
/// `Endpoint` per signaling channel; one `PeerSession` per connected viewer,
/// each driven by its own orchestrator task.
pub struct Endpoint {
    config: EndpointConfig,
    certificate: Arc<EndpointCertificate>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl Endpoint {
    /// Generates the endpoint's DTLS certificate and initializes an empty
    /// session table (spec.md §3 "Endpoint construction"). SRTP/DTLS/SCTP
    /// library state lives entirely in their own crates and needs no
    /// explicit init here; those crates are stateless at the process level.
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let certificate = Arc::new(EndpointCertificate::generate()?);
        Ok(Endpoint {
            config,
            certificate,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn prepare_session(
        &self,
        remote_client_id: String,
        role: Role,
        source_callbacks: Option<Arc<dyn MediaSourceCallbacks>>,
    ) -> Result<(PeerSession, RequestQueueReceiver)> {
        if remote_client_id.len() > 256 {
            return Err(Error::ErrClientIdTooLong);
        }
        let sessions = self.sessions.lock().await;
        if sessions.len() >= self.config.max_viewers {
            return Err(Error::ErrSessionSlotsExhausted);
        }
        drop(sessions);

        let (queue_tx, queue_rx) = queue::bounded(queue::DEFAULT_CAPACITY);
        let mut session = PeerSession::new(
            remote_client_id,
            role,
            Arc::clone(&self.certificate),
            &self.config,
            queue_tx,
        );
        if let Some(callbacks) = source_callbacks {
            for kind in [Kind::Video, Kind::Audio] {
                session.init_transceiver(kind, callbacks.clone())?;
            }
        }
        Ok((session, queue_rx))
    }

    #[allow(clippy::too_many_arguments)]
    async fn spawn_session(
        &self,
        session: PeerSession,
        queue_rx: RequestQueueReceiver,
        ice_servers: Vec<Url>,
        sink: Option<Arc<dyn MediaSink>>,
        signaling_client: Option<Arc<dyn SignalingClient>>,
    ) {
        let remote_client_id = session.remote_client_id.clone();
        let queue_tx = session.queue_tx.clone();
        let task = tokio::spawn(orchestrator::run(
            session,
            queue_rx,
            ice_servers,
            sink,
            signaling_client,
        ));
        self.sessions
            .lock()
            .await
            .insert(remote_client_id, SessionHandle { queue_tx, task });
    }

    /// Accepts a viewer's SDP offer: creates the session, negotiates
    /// codecs against the offer, and returns the local answer to send back
    /// over signaling (spec.md §4.7 "master" role). `signaling_client`
    /// receives this session's trickled local ICE candidates as they are
    /// gathered (spec.md §4.1 "local_candidate_ready").
    #[allow(clippy::too_many_arguments)]
    pub async fn accept_offer(
        &self,
        remote_client_id: String,
        wire_offer_sdp: &str,
        ice_servers: Vec<Url>,
        source_callbacks: Option<Arc<dyn MediaSourceCallbacks>>,
        sink: Option<Arc<dyn MediaSink>>,
        signaling_client: Option<Arc<dyn SignalingClient>>,
    ) -> Result<String> {
        let (mut session, queue_rx) = self
            .prepare_session(remote_client_id, Role::Server, source_callbacks)
            .await?;
        session.set_remote_description(wire_offer_sdp)?;
        let answer = session.create_answer()?;
        self.spawn_session(session, queue_rx, ice_servers, sink, signaling_client)
            .await;
        Ok(answer)
    }

    /// Creates a session as the offering side and returns the local offer
    /// (spec.md §4.7 "viewer" role). The remote answer arrives later
    /// through [`Endpoint::set_remote_description`].
    #[allow(clippy::too_many_arguments)]
    pub async fn create_offer(
        &self,
        remote_client_id: String,
        ice_servers: Vec<Url>,
        source_callbacks: Option<Arc<dyn MediaSourceCallbacks>>,
        sink: Option<Arc<dyn MediaSink>>,
        signaling_client: Option<Arc<dyn SignalingClient>>,
    ) -> Result<String> {
        let (session, queue_rx) = self
            .prepare_session(remote_client_id, Role::Client, source_callbacks)
            .await?;
        let offer = session.create_offer()?;
        self.spawn_session(session, queue_rx, ice_servers, sink, signaling_client)
            .await;
        Ok(offer)
    }

    /// Hands a remote SDP answer/offer renegotiation to its session's
    /// orchestrator (spec.md §6 `SDP_ANSWER`).
    pub async fn set_remote_description(&self, remote_client_id: &str, wire_sdp: String) -> Result<()> {
        self.enqueue(remote_client_id, PeerRequest::RemoteDescription(wire_sdp)).await
    }

    /// Hands a trickled remote ICE candidate to its session (spec.md §6
    /// `ICE_CANDIDATE`).
    pub async fn add_remote_ice_candidate(
        &self,
        remote_client_id: &str,
        candidate: IceCandidateInit,
    ) -> Result<()> {
        self.enqueue(remote_client_id, PeerRequest::RemoteIceCandidate(candidate)).await
    }

    /// Enqueues one encoded frame for every active session carrying that
    /// transceiver kind (spec.md §6 `write_frame`, broadcast to all
    /// viewers sharing this media source). Per-session queue-full is not
    /// escalated to the caller: a single slow viewer must not stall the
    /// source (spec.md §4.7 "a full queue rejects further frames rather
    /// than blocking the media source").
    pub async fn write_frame(&self, frame: Frame) {
        let sessions = self.sessions.lock().await;
        for handle in sessions.values() {
            let _ = handle.queue_tx.try_send(PeerRequest::WriteFrame(frame.clone()));
        }
    }

    /// Tears a session down and removes it from the table (spec.md §7
    /// "Session destruction").
    pub async fn close_session(&self, remote_client_id: &str) -> Result<()> {
        let handle = self
            .sessions
            .lock()
            .await
            .remove(remote_client_id)
            .ok_or(Error::ErrUnknownSession)?;
        let _ = handle.queue_tx.try_send(PeerRequest::Close);
        let _ = handle.task.await;
        Ok(())
    }

    async fn enqueue(&self, remote_client_id: &str, request: PeerRequest) -> Result<()> {
        let sessions = self.sessions.lock().await;
        let handle = sessions.get(remote_client_id).ok_or(Error::ErrUnknownSession)?;
        handle.queue_tx.try_send(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_session_lookup_is_rejected() {
        let endpoint = Endpoint::new(EndpointConfig::default()).unwrap();
        let err = endpoint
            .set_remote_description("nobody", String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ErrUnknownSession));
    }

    #[tokio::test]
    async fn oversized_client_id_is_rejected_before_any_session_is_created() {
        let endpoint = Endpoint::new(EndpointConfig::default()).unwrap();
        let err = endpoint
            .create_offer("x".repeat(257), vec![], None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ErrClientIdTooLong));
        assert_eq!(endpoint.session_count().await, 0);
    }
}

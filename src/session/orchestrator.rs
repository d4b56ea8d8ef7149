//! Per-session orchestrator task (spec.md §4.7): drains the bounded
//! request queue, drives ICE/DTLS/SRTP negotiation off the first remote
//! description, then alternates between queued requests and inbound
//! SRTP/SRTCP datagrams until the session closes.
//!
//! Grounded on the teacher's per-connection event loop shape (a single task
//! owns the connection's mutable state and reacts to whichever of several
//! channels is ready first via `tokio::select!`), adapted here to the
//! spec's single-task-per-session model instead of the teacher's
//! callback-registry dispatch.

use std::sync::Arc;

use ice::state::ConnectionState;
use ice::url::Url;
use util::Conn;

use crate::ice_transport::{spawn_demux, DemuxedConn};
use crate::media_source::{Frame, MediaSink};
use crate::session::queue::{PeerRequest, RequestQueueReceiver};
use crate::session::{IncomingOutcome, PeerSession, SessionState};
use crate::signaling::SignalingClient;

const DTLS_CHANNEL_CAPACITY: usize = 16;
const SRTP_CHANNEL_CAPACITY: usize = 64;

/// Runs one session to completion. Returns once `PeerRequest::Close` is
/// processed, the queue sender is dropped, or the SRTP transport errors out.
pub async fn run(
    mut session: PeerSession,
    mut queue_rx: RequestQueueReceiver,
    ice_servers: Vec<Url>,
    sink: Option<Arc<dyn MediaSink>>,
    signaling_client: Option<Arc<dyn SignalingClient>>,
) {
    session.sink = sink;
    session.signaling_client = signaling_client;
    let mut srtp_conn: Option<Arc<DemuxedConn>> = None;

    loop {
        tokio::select! {
            request = queue_rx.recv() => {
                match request {
                    Some(PeerRequest::RemoteDescription(wire_sdp)) => {
                        if let Err(e) = session.set_remote_description(&wire_sdp) {
                            log::warn!("{}: set_remote_description failed: {e}", session.remote_client_id);
                            continue;
                        }
                        if session.state() == SessionState::Start && srtp_conn.is_none() {
                            match negotiate(&mut session, ice_servers.clone()).await {
                                Ok(conn) => srtp_conn = Some(conn),
                                Err(e) => {
                                    // Per-handshake failure (DTLS fingerprint
                                    // mismatch, ICE timeout, ...): tear the
                                    // session down and report peer-closed
                                    // rather than leaving it hung (spec.md §7).
                                    log::warn!("{}: negotiation failed: {e}", session.remote_client_id);
                                    session.close().await;
                                    return;
                                }
                            }
                        }
                    }
                    Some(PeerRequest::RemoteIceCandidate(candidate)) => {
                        if let Err(e) = session.add_remote_ice_candidate(&candidate) {
                            log::warn!("{}: add_remote_ice_candidate failed: {e}", session.remote_client_id);
                        }
                    }
                    Some(PeerRequest::WriteFrame(frame)) => {
                        write_and_send(&mut session, &srtp_conn, frame).await;
                    }
                    Some(PeerRequest::IceConnectionStateChanged(state)) => {
                        if matches!(state, ConnectionState::Failed | ConnectionState::Disconnected)
                            && session.state() == SessionState::ConnectionReady
                        {
                            log::warn!("{}: ICE connection {state}, restarting", session.remote_client_id);
                            srtp_conn = None;
                            if let Err(e) = session.restart_ice().await {
                                log::warn!("{}: ICE restart failed: {e}", session.remote_client_id);
                                session.close().await;
                                return;
                            }
                        }
                    }
                    Some(PeerRequest::Close) | None => {
                        session.close().await;
                        return;
                    }
                }
            }
            incoming = recv_from(&srtp_conn) => {
                match incoming {
                    Some(datagram) => dispatch_incoming(&mut session, &srtp_conn, &datagram).await,
                    None if srtp_conn.is_some() => {
                        session.close().await;
                        return;
                    }
                    None => {}
                }
            }
        }
    }
}

/// Reads one datagram off the session's SRTP/SRTCP demux channel. Blocks
/// forever (rather than returning) when no transport is keyed yet, so the
/// enclosing `select!` simply never picks this branch until negotiation
/// completes.
async fn recv_from(conn: &Option<Arc<DemuxedConn>>) -> Option<Vec<u8>> {
    match conn {
        None => std::future::pending().await,
        Some(c) => {
            let mut buf = vec![0u8; crate::RECEIVE_MTU];
            match c.recv(&mut buf).await {
                Ok(n) => Some(buf[..n].to_vec()),
                Err(_) => None,
            }
        }
    }
}

/// Starts ICE, splits the nominated transport into DTLS/SRTP demux
/// channels, and drives the DTLS handshake to completion (spec.md §4.1,
/// §4.2, §4.3). Returns the SRTP side for the caller's read/write loop.
async fn negotiate(
    session: &mut PeerSession,
    ice_servers: Vec<Url>,
) -> crate::error::Result<Arc<DemuxedConn>> {
    let transport = session.start_ice(ice_servers).await?;

    let (dtls_tx, dtls_rx) = tokio::sync::mpsc::channel(DTLS_CHANNEL_CAPACITY);
    let (srtp_tx, srtp_rx) = tokio::sync::mpsc::channel(SRTP_CHANNEL_CAPACITY);
    spawn_demux(transport.clone(), dtls_tx, srtp_tx);

    let dtls_conn = Arc::new(DemuxedConn::new(transport.clone(), dtls_rx));
    let srtp_conn = Arc::new(DemuxedConn::new(transport, srtp_rx));

    session.complete_handshake(dtls_conn, srtp_conn.clone()).await?;
    Ok(srtp_conn)
}

async fn dispatch_incoming(session: &mut PeerSession, srtp_conn: &Option<Arc<DemuxedConn>>, datagram: &[u8]) {
    match session.handle_incoming(datagram).await {
        Ok(IncomingOutcome::Frame(frame)) => {
            if let Some(sink) = session.sink.clone() {
                sink.on_frame_ready(frame).await;
            }
        }
        Ok(IncomingOutcome::Rtcp(outcomes)) => {
            for (kind, outcome) in outcomes {
                if outcome.nacked.is_empty() {
                    continue;
                }
                match session.resend_nacked(kind, &outcome) {
                    Ok(resends) => send_all(srtp_conn, resends).await,
                    Err(e) => log::warn!("{}: resend_nacked failed: {e}", session.remote_client_id),
                }
            }
        }
        Ok(IncomingOutcome::None) => {}
        Err(e) => log::warn!("{}: handle_incoming failed: {e}", session.remote_client_id),
    }
}

async fn write_and_send(session: &mut PeerSession, srtp_conn: &Option<Arc<DemuxedConn>>, frame: Frame) {
    match session.write_frame(frame) {
        Ok(packets) => send_all(srtp_conn, packets).await,
        Err(e) => log::warn!("{}: write_frame failed: {e}", session.remote_client_id),
    }
}

async fn send_all(srtp_conn: &Option<Arc<DemuxedConn>>, packets: Vec<bytes::Bytes>) {
    let Some(conn) = srtp_conn else { return };
    for packet in packets {
        if let Err(e) = conn.send(&packet).await {
            log::warn!("srtp send failed: {e}");
            return;
        }
    }
}

//! Per-peer session: the orchestrator's data model (spec.md §3 "Peer
//! session", §4.7). Ties together the ICE transport, DTLS bridge, SRTP
//! contexts, jitter buffers and transceivers behind the lifecycle state
//! machine in [`state`].

pub mod orchestrator;
pub mod queue;
pub mod state;
pub mod transceiver;

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use ice::url::Url;

use crate::certificate::EndpointCertificate;
use crate::config::{AudioCodec, EndpointConfig, NatTraversalPolicy, VideoCodec};
use crate::dtls_bridge::{DtlsBridge, Role};
use crate::error::{Error, Result};
use crate::ice_transport::IceTransport;
use crate::media_source::{Frame, MediaSink, MediaSourceCallbacks};
use crate::rtp_jitter::{handle_rtcp, FramePayloader, JitterBuffer, JitterEvent, RtcpOutcome, TwccRateController};
use crate::sdp_bridge::{
    self, build_local_description, deserialize_sdp_newline, extract_media_sections,
    serialize_sdp_newline, LocalSessionParams, MediaSectionInput, RemoteMediaSection,
};
use crate::signaling::{IceCandidateInit, MessageType, SignalingClient, SignalingMessage};
use crate::srtp_session::{ReceiveContext, SendContext, SrtpKeys};

pub use state::SessionState;
pub use transceiver::{CodecSet, Direction, Kind, Transceiver};

fn codec_flag_for_name(name: &str) -> Option<CodecSet> {
    match name.to_ascii_lowercase().as_str() {
        "h264" => Some(CodecSet::H264),
        "h265" => Some(CodecSet::H265),
        "vp8" => Some(CodecSet::VP8),
        "opus" => Some(CodecSet::OPUS),
        "pcmu" => Some(CodecSet::G711_U),
        "pcma" => Some(CodecSet::G711_A),
        _ => None,
    }
}

fn codec_flag_name(flag: CodecSet) -> &'static str {
    match flag {
        CodecSet::H264 => "H264",
        CodecSet::H265 => "H265",
        CodecSet::VP8 => "VP8",
        CodecSet::OPUS => "opus",
        CodecSet::G711_U => "PCMU",
        CodecSet::G711_A => "PCMA",
        _ => "H264",
    }
}

/// What routing one inbound SRTP/SRTCP datagram produced (spec.md §4.4,
/// §4.7). A single compound SRTCP packet can carry feedback for more than
/// one transceiver kind at once, so `Rtcp` carries one outcome per kind
/// that had anything happen rather than at most one.
#[derive(Debug)]
pub enum IncomingOutcome {
    None,
    Frame(Frame),
    Rtcp(HashMap<Kind, RtcpOutcome>),
}

/// One peer session (spec.md §3). Owned by the endpoint's session table;
/// driven exclusively by [`orchestrator::run`].
pub struct PeerSession {
    pub remote_client_id: String,
    pub role: Role,
    state: SessionState,
    certificate: Arc<EndpointCertificate>,

    local_ufrag: String,
    local_pwd: String,
    nat_traversal: NatTraversalPolicy,
    video_codec: VideoCodec,
    audio_codec: AudioCodec,

    ice: Option<IceTransport>,
    dtls: DtlsBridge,
    srtp_conn: Option<Arc<crate::ice_transport::DemuxedConn>>,
    send_context: Option<SendContext>,
    receive_context: Option<ReceiveContext>,
    twcc: TwccRateController,

    transceivers: HashMap<Kind, Transceiver>,
    jitter_buffers: HashMap<u32, (Kind, JitterBuffer)>,
    remote_sections: Vec<RemoteMediaSection>,

    pub sink: Option<Arc<dyn MediaSink>>,
    pub signaling_client: Option<Arc<dyn SignalingClient>>,
    pub queue_tx: queue::RequestQueueSender,
}

impl PeerSession {
    pub fn new(
        remote_client_id: String,
        role: Role,
        certificate: Arc<EndpointCertificate>,
        config: &EndpointConfig,
        queue_tx: queue::RequestQueueSender,
    ) -> Self {
        let mut transceivers = HashMap::new();
        let video_flag = match config.video_codec {
            crate::config::VideoCodec::H264 => CodecSet::H264,
            crate::config::VideoCodec::H265 => CodecSet::H265,
        };
        let audio_flag = match config.audio_codec {
            crate::config::AudioCodec::Opus => CodecSet::OPUS,
            crate::config::AudioCodec::G711Mu => CodecSet::G711_U,
            crate::config::AudioCodec::G711A => CodecSet::G711_A,
        };

        let mut video = Transceiver::new(Kind::Video, Direction::SendOnly, video_flag);
        video.payload_type = 96;
        video.rtx_payload_type = Some(97);
        if config.enable_twcc {
            video.twcc_ext_id = Some(3);
        }
        transceivers.insert(Kind::Video, video);

        let mut audio = Transceiver::new(Kind::Audio, Direction::SendOnly, audio_flag);
        audio.payload_type = match config.audio_codec {
            crate::config::AudioCodec::G711Mu => 0,
            crate::config::AudioCodec::G711A => 8,
            crate::config::AudioCodec::Opus => 111,
        };
        // G.711 clocks at 8000 Hz; `Transceiver::new` defaults audio to
        // Opus's 48000 (spec.md §4.4 step 1).
        audio.clock_rate = match config.audio_codec {
            crate::config::AudioCodec::G711Mu | crate::config::AudioCodec::G711A => 8_000,
            crate::config::AudioCodec::Opus => audio.clock_rate,
        };
        transceivers.insert(Kind::Audio, audio);

        PeerSession {
            remote_client_id,
            role,
            state: SessionState::Inited,
            certificate: Arc::clone(&certificate),
            local_ufrag: sdp_bridge::generate_ice_ufrag(),
            local_pwd: sdp_bridge::generate_ice_pwd(),
            nat_traversal: config.nat_traversal,
            video_codec: config.video_codec,
            audio_codec: config.audio_codec,
            ice: None,
            dtls: DtlsBridge::new(role, certificate.certificate.clone()),
            srtp_conn: None,
            send_context: None,
            receive_context: None,
            twcc: TwccRateController::new(),
            transceivers,
            jitter_buffers: HashMap::new(),
            remote_sections: Vec::new(),
            sink: None,
            signaling_client: None,
            queue_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::ErrInvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// `create_offer` (viewer role): emits a local SDP offer before any
    /// remote description is known, so `setup` is left negotiable
    /// (spec.md §4.7, RFC 4145 `actpass`).
    pub fn create_offer(&self) -> Result<String> {
        let sections = self.local_media_sections();
        let params = LocalSessionParams {
            ice_ufrag: &self.local_ufrag,
            ice_pwd: &self.local_pwd,
            fingerprint: self.certificate.fingerprint(),
            setup: "actpass",
        };
        let desc = build_local_description(&params, &sections);
        Ok(serialize_sdp_newline(&desc.marshal()))
    }

    /// `create_answer` (master role): emitted after `set_remote_description`
    /// has populated negotiated codecs (spec.md §4.7).
    pub fn create_answer(&self) -> Result<String> {
        let sections = self.local_media_sections();
        let params = LocalSessionParams {
            ice_ufrag: &self.local_ufrag,
            ice_pwd: &self.local_pwd,
            fingerprint: self.certificate.fingerprint(),
            setup: "passive",
        };
        let desc = build_local_description(&params, &sections);
        Ok(serialize_sdp_newline(&desc.marshal()))
    }

    fn local_media_sections(&self) -> Vec<MediaSectionInput<'_>> {
        let mut sections = Vec::new();
        for kind in [Kind::Video, Kind::Audio] {
            if let Some(t) = self.transceivers.get(&kind) {
                let codec_name = t
                    .negotiated_codec
                    .as_deref()
                    .unwrap_or_else(|| codec_flag_name(t.enabled_codecs));
                sections.push(MediaSectionInput {
                    transceiver: t,
                    codec_name,
                });
            }
        }
        sections
    }

    /// Parses the remote SDP, negotiates codecs, and records the
    /// ufrag/pwd/fingerprint/SSRC needed to start ICE (spec.md §4.7 "On
    /// `set_remote_description`"). Advances `Inited`/`ConnectionReady` to
    /// `Start` (the latter only on an ICE restart's renegotiation).
    pub fn set_remote_description(&mut self, wire_sdp: &str) -> Result<()> {
        let canonical = deserialize_sdp_newline(wire_sdp);
        let mut reader = Cursor::new(canonical.as_bytes());
        let desc = sdp::description::session::SessionDescription::unmarshal(&mut reader)?;
        let sections = extract_media_sections(&desc)?;

        for section in &sections {
            let Some(kind) = section.kind else { continue };
            if let Some(t) = self.transceivers.get_mut(&kind) {
                for name in &section.codecs {
                    if let Some(flag) = codec_flag_for_name(name) {
                        if t.enabled_codecs.contains(flag) {
                            t.negotiated_codec = Some(name.clone());
                            break;
                        }
                    }
                }
                if t.negotiated_codec.is_none() {
                    return Err(Error::ErrNoCodecIntersection(kind));
                }
                t.twcc_ext_id = section.twcc_ext_id;
            }

            if let Some(fp) = &section.fingerprint {
                self.dtls.init(fp.clone());
            }
        }

        self.remote_sections = sections;

        let next = match self.state {
            SessionState::Inited => SessionState::Start,
            SessionState::ConnectionReady => SessionState::Start,
            other => other,
        };
        self.transition(next)
    }

    /// Starts the ICE agent for this session using the first remote media
    /// section's credentials (spec.md §4.1 `start`). Separated from
    /// `set_remote_description` so the caller can supply freshly fetched
    /// ICE server URLs (spec.md §6 `RECONNECT_ICE_SERVER`).
    pub async fn start_ice(&mut self, ice_servers: Vec<Url>) -> Result<Arc<dyn util::Conn + Send + Sync>> {
        let remote = self
            .remote_sections
            .first()
            .ok_or(Error::ErrMissingSdpAttribute("ice-ufrag"))?
            .clone();

        let is_controlling = self.role == Role::Client;
        let ice = IceTransport::new(
            self.nat_traversal,
            ice_servers,
            self.local_ufrag.clone(),
            self.local_pwd.clone(),
            is_controlling,
        )
        .await?;

        if let Some(signaling) = &self.signaling_client {
            let signaling = Arc::clone(signaling);
            let remote_client_id = self.remote_client_id.clone();
            ice.on_local_candidate(Box::new(move |candidate| {
                let signaling = Arc::clone(&signaling);
                let remote_client_id = remote_client_id.clone();
                tokio::spawn(async move {
                    let init = IceCandidateInit {
                        candidate,
                        sdp_mid: "0".to_owned(),
                        sdp_mline_index: 0,
                    };
                    let payload = match serde_json::to_vec(&init) {
                        Ok(p) => p,
                        Err(e) => {
                            log::warn!("failed to encode trickled candidate: {e}");
                            return;
                        }
                    };
                    let message = SignalingMessage {
                        message_type: MessageType::IceCandidate,
                        remote_client_id,
                        correlation_id: None,
                        payload,
                    };
                    if let Err(e) = signaling.send_message(message).await {
                        log::warn!("failed to trickle local candidate: {e}");
                    }
                });
            }));
        }

        {
            let queue_tx = self.queue_tx.clone();
            let remote_client_id = self.remote_client_id.clone();
            ice.on_connection_state_change(Box::new(move |state| {
                if let Err(e) = queue_tx.try_send(queue::PeerRequest::IceConnectionStateChanged(state)) {
                    log::warn!("{remote_client_id}: dropped ICE connection state change: {e}");
                }
            }));
        }

        let transport = ice
            .start(is_controlling, remote.ice_ufrag.clone(), remote.ice_pwd.clone())
            .await?;
        self.ice = Some(ice);
        self.transition(SessionState::P2PConnectionFound)?;
        Ok(transport)
    }

    /// Re-runs ICE with fresh credentials after the nominated pair is lost
    /// once the session was already `ConnectionReady` (spec.md §4.1
    /// "Failure semantics": "a lost nominated pair after ready triggers ICE
    /// restart"). Steps the state machine back to `Start`; the orchestrator
    /// re-negotiates DTLS/SRTP from there exactly as it does for the
    /// session's first connection attempt.
    pub async fn restart_ice(&mut self) -> Result<()> {
        let ice = self.ice.as_ref().ok_or(Error::ErrSessionNotReady)?;
        let new_ufrag = sdp_bridge::generate_ice_ufrag();
        let new_pwd = sdp_bridge::generate_ice_pwd();
        ice.restart(new_ufrag.clone(), new_pwd.clone()).await?;
        self.local_ufrag = new_ufrag;
        self.local_pwd = new_pwd;
        self.transition(SessionState::Start)
    }

    /// Drives the DTLS handshake and derives SRTP keys (spec.md §4.3,
    /// §4.4). Idempotent via `DtlsBridge::execute_handshake`.
    pub async fn complete_handshake(
        &mut self,
        dtls_conn: Arc<dyn util::Conn + Send + Sync>,
        srtp_conn: Arc<crate::ice_transport::DemuxedConn>,
    ) -> Result<()> {
        self.dtls.execute_handshake(dtls_conn).await?;
        self.dtls.verify_remote_fingerprint().await?;
        let keys = self.dtls.populate_keying_material().await?;
        self.wire_srtp(&keys, srtp_conn)?;
        self.transition(SessionState::ConnectionReady)?;

        for t in self.transceivers.values() {
            if let Some(cb) = &t.callbacks {
                cb.on_peer_ready(t.kind).await;
            }
        }
        Ok(())
    }

    fn wire_srtp(
        &mut self,
        keys: &SrtpKeys,
        srtp_conn: Arc<crate::ice_transport::DemuxedConn>,
    ) -> Result<()> {
        let profile = srtp::protection_profile::ProtectionProfile::Aes128CmHmacSha1_80;
        let video = self.transceivers.get(&Kind::Video);
        let sizing = video.unwrap_or_else(|| self.transceivers.get(&Kind::Audio).unwrap());

        self.send_context = Some(SendContext::new(keys, profile, sizing)?);
        self.receive_context = Some(ReceiveContext::new(keys, profile)?);
        self.srtp_conn = Some(srtp_conn);

        for section in &self.remote_sections {
            let (Some(kind), Some(ssrc)) = (section.kind, section.ssrc) else {
                continue;
            };
            let clock_rate = self
                .transceivers
                .get(&kind)
                .map(|t| t.clock_rate)
                .unwrap_or_else(|| kind.default_clock_rate());
            self.jitter_buffers
                .insert(ssrc, (kind, JitterBuffer::new(ssrc, kind, clock_rate, 2.0)));
        }
        Ok(())
    }

    /// Packetizes and SRTP-protects one frame, returning the ciphertext
    /// ready for the caller to hand to `srtp_conn` (spec.md §4.4 outbound
    /// path). Rejects writes before the session is ready (spec.md §4.7
    /// "On `write_frame`").
    pub fn write_frame(&mut self, frame: Frame) -> Result<Vec<Bytes>> {
        if self.state != SessionState::ConnectionReady {
            return Err(Error::ErrSessionNotReady);
        }
        let send_context = self.send_context.as_mut().ok_or(Error::ErrSessionNotReady)?;
        let transceiver = self
            .transceivers
            .get_mut(&frame.kind)
            .ok_or(Error::ErrTransceiverNotConfigured(frame.kind))?;

        let mtu = crate::MAX_RTP_PAYLOAD_SIZE;
        let timestamp = transceiver.timestamp_from_presentation_us(frame.presentation_time_us);
        let mut payloader = match frame.kind {
            Kind::Video => FramePayloader::for_video(self.video_codec)?,
            Kind::Audio => FramePayloader::for_audio(self.audio_codec),
        };
        let payloads = payloader.payload(mtu, &Bytes::from(frame.data))?;

        let mut protected = Vec::with_capacity(payloads.len());
        let last = payloads.len().saturating_sub(1);
        for (i, payload) in payloads.into_iter().enumerate() {
            let marker = i == last;
            protected.push(send_context.protect_and_buffer(transceiver, payload, marker, timestamp)?);
        }
        Ok(protected)
    }

    /// Resends the packets NACKed by `outcome`, returning SRTP ciphertext
    /// ready to send (spec.md §4.4 "Retransmission").
    pub fn resend_nacked(&mut self, kind: Kind, outcome: &RtcpOutcome) -> Result<Vec<Bytes>> {
        let send_context = self.send_context.as_mut().ok_or(Error::ErrSessionNotReady)?;
        let transceiver = self
            .transceivers
            .get_mut(&kind)
            .ok_or(Error::ErrTransceiverNotConfigured(kind))?;

        let mut resent = Vec::new();
        for nacked in &outcome.nacked {
            if let Some(bytes) = send_context.resend(transceiver, nacked.0)? {
                resent.push(bytes);
            }
        }
        Ok(resent)
    }

    /// Unprotects one inbound SRTP packet and feeds it to its SSRC's
    /// jitter buffer, returning a reassembled frame if one became ready
    /// (spec.md §4.4 inbound path, §4.5).
    pub fn handle_incoming_srtp(&mut self, encrypted: &[u8]) -> Result<Option<Frame>> {
        let receive_context = self
            .receive_context
            .as_mut()
            .ok_or(Error::ErrSessionNotReady)?;
        let (header, payload) = receive_context.unprotect(encrypted)?;

        let Some((kind, jitter_buffer)) = self.jitter_buffers.get_mut(&header.ssrc) else {
            return Ok(None);
        };
        let kind = *kind;
        let event = jitter_buffer.push(header.sequence_number, header.timestamp, payload, header.marker)?;

        match event {
            JitterEvent::FrameReady { start_seq, end_seq } => {
                let (data, ts) = jitter_buffer.fill_frame(start_seq, end_seq)?;
                Ok(Some(Frame {
                    kind,
                    data: data.to_vec(),
                    presentation_time_us: (ts as u64 * 1_000_000)
                        / self.transceivers.get(&kind).map(|t| t.clock_rate as u64).unwrap_or(90_000),
                }))
            }
            _ => Ok(None),
        }
    }

    /// Unprotects one inbound SRTCP compound packet and dispatches NACK /
    /// TWCC / PLI handling to every transceiver it names (spec.md §4.4,
    /// §4.6 "RTCP"). A compound packet can carry feedback for both
    /// transceiver kinds at once (e.g. a video NACK alongside an audio
    /// PLI, or one TWCC report that updates every kind's target bitrate),
    /// so every transceiver's outcome is collected rather than stopping at
    /// the first one with anything to report.
    pub async fn handle_incoming_srtcp(&mut self, encrypted: &[u8]) -> Result<Option<HashMap<Kind, RtcpOutcome>>> {
        let receive_context = self
            .receive_context
            .as_mut()
            .ok_or(Error::ErrSessionNotReady)?;
        let payload = receive_context.unprotect_rtcp(encrypted)?;

        let outcomes = handle_rtcp(&payload, &mut self.twcc, &mut self.transceivers)?;
        if outcomes.is_empty() {
            return Ok(None);
        }

        for (kind, outcome) in &outcomes {
            let Some(transceiver) = self.transceivers.get(kind) else {
                continue;
            };
            let Some(cb) = &transceiver.callbacks else {
                continue;
            };
            if let Some(update) = &outcome.bitrate_update {
                cb.on_bitrate_modified(*kind, update.new_target_bps).await;
            }
            if outcome.picture_loss {
                cb.on_picture_loss(*kind).await;
            }
        }
        Ok(Some(outcomes))
    }

    /// Routes one datagram off the SRTP/SRTCP demux channel to the RTP or
    /// RTCP path by its second byte (RFC 5761 §4: muxed RTCP packet types
    /// fall in 192-223, below any valid RTP payload type).
    pub async fn handle_incoming(&mut self, encrypted: &[u8]) -> Result<IncomingOutcome> {
        let is_rtcp = encrypted.len() > 1 && (192..=223).contains(&encrypted[1]);
        if is_rtcp {
            match self.handle_incoming_srtcp(encrypted).await? {
                Some(outcomes) => Ok(IncomingOutcome::Rtcp(outcomes)),
                None => Ok(IncomingOutcome::None),
            }
        } else {
            match self.handle_incoming_srtp(encrypted)? {
                Some(frame) => Ok(IncomingOutcome::Frame(frame)),
                None => Ok(IncomingOutcome::None),
            }
        }
    }

    /// Registers the media source's callbacks for one transceiver (spec.md
    /// §6 `init_transceiver`). Must be called before the session is handed
    /// to [`orchestrator::run`], since the orchestrator owns the session
    /// exclusively from then on.
    pub fn init_transceiver(&mut self, kind: Kind, callbacks: Arc<dyn MediaSourceCallbacks>) -> Result<()> {
        let t = self
            .transceivers
            .get_mut(&kind)
            .ok_or(Error::ErrTransceiverNotConfigured(kind))?;
        t.callbacks = Some(callbacks);
        Ok(())
    }

    pub fn add_remote_ice_candidate(&self, candidate: &IceCandidateInit) -> Result<()> {
        self.ice
            .as_ref()
            .ok_or(Error::ErrMissingSdpAttribute("ice-ufrag"))?
            .add_remote_candidate(candidate)
    }

    pub fn srtp_conn(&self) -> Option<Arc<crate::ice_transport::DemuxedConn>> {
        self.srtp_conn.clone()
    }

    /// Tears the session down, always notifying every transceiver's media
    /// source of `peer-closed` (spec.md §7 "Session destruction always
    /// emits peer-closed").
    pub async fn close(&mut self) {
        self.state = SessionState::Closed;
        if let Some(ice) = self.ice.take() {
            let _ = ice.close().await;
        }
        for t in self.transceivers.values() {
            if let Some(cb) = &t.callbacks {
                cb.on_peer_closed(t.kind).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> PeerSession {
        let cert = Arc::new(EndpointCertificate::generate().unwrap());
        let (tx, _rx) = queue::bounded(queue::DEFAULT_CAPACITY);
        PeerSession::new(
            "viewer-1".to_owned(),
            Role::Server,
            cert,
            &EndpointConfig::default(),
            tx,
        )
    }

    #[test]
    fn write_frame_before_ready_is_rejected() {
        let mut session = test_session();
        let err = session
            .write_frame(Frame {
                kind: Kind::Video,
                data: vec![0x65, 0xAA],
                presentation_time_us: 0,
            })
            .unwrap_err();
        assert!(matches!(err, Error::ErrSessionNotReady));
    }

    #[test]
    fn codec_flag_round_trips_common_names() {
        assert_eq!(codec_flag_for_name("H264"), Some(CodecSet::H264));
        assert_eq!(codec_flag_for_name("opus"), Some(CodecSet::OPUS));
        assert_eq!(codec_flag_for_name("PCMU"), Some(CodecSet::G711_U));
        assert_eq!(codec_flag_for_name("vp9"), None);
    }

    #[test]
    fn g711_audio_transceiver_clocks_at_8khz() {
        let cert = Arc::new(EndpointCertificate::generate().unwrap());
        let (tx, _rx) = queue::bounded(queue::DEFAULT_CAPACITY);
        let mut config = EndpointConfig::default();
        config.audio_codec = crate::config::AudioCodec::G711Mu;
        let session = PeerSession::new("viewer-1".to_owned(), Role::Server, cert, &config, tx);
        assert_eq!(session.transceivers[&Kind::Audio].clock_rate, 8_000);
    }

    #[test]
    fn opus_audio_transceiver_clocks_at_48khz() {
        let session = test_session();
        assert_eq!(session.transceivers[&Kind::Audio].clock_rate, 48_000);
    }

    #[tokio::test]
    async fn restart_ice_before_ice_has_started_is_rejected() {
        let mut session = test_session();
        let err = session.restart_ice().await.unwrap_err();
        assert!(matches!(err, Error::ErrSessionNotReady));
    }
}

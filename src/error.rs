use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An API call was made with a malformed or oversized caller-supplied
    /// identifier (spec.md §7 category 1: invalid input).
    #[error("remote client id exceeds 256 bytes")]
    ErrClientIdTooLong,

    /// The endpoint has no free session slot (spec.md §3, §7 category 3).
    #[error("no free peer session slot (max_viewers reached)")]
    ErrSessionSlotsExhausted,

    /// A caller referenced a session id the endpoint does not own.
    #[error("unknown peer session")]
    ErrUnknownSession,

    /// A session's per-session request queue is full.
    #[error("peer session request queue is full")]
    ErrRequestQueueFull,

    /// `write_frame` was called before the session reached `ConnectionReady`.
    #[error("session is not ready to send media")]
    ErrSessionNotReady,

    /// `set_remote_description` / `create_answer` called out of order.
    #[error("invalid session state transition from {from:?} to {to:?}")]
    ErrInvalidStateTransition { from: String, to: String },

    /// The remote SDP carried no ice-ufrag, ice-pwd, or fingerprint.
    #[error("remote SDP is missing required attribute: {0}")]
    ErrMissingSdpAttribute(&'static str),

    /// The remote SDP listed more than one audio or video media section.
    #[error("remote SDP has more than one {0} media section")]
    ErrMultipleMediaSections(&'static str),

    /// The certificate fingerprint offered by the remote DTLS peer does not
    /// match the fingerprint advertised in its SDP (spec.md §8, scenario 5).
    #[error("DTLS peer certificate fingerprint does not match SDP fingerprint")]
    ErrFingerprintMismatch,

    /// ICE failed to nominate a pair within the 30s upper bound (spec.md §4.1).
    #[error("ICE connectivity checks exhausted all pairs without nomination")]
    ErrIceNegotiationTimeout,

    /// A transceiver kind the caller requested is not enabled by configuration.
    #[error("no transceiver configured for kind {0:?}")]
    ErrTransceiverNotConfigured(crate::session::transceiver::Kind),

    /// No codec offered by the remote intersects this transceiver's enabled set.
    #[error("no codec intersection for {0:?} transceiver")]
    ErrNoCodecIntersection(crate::session::transceiver::Kind),

    /// A negotiated codec has no outbound packetizer in this build.
    #[error("no outbound packetizer available for codec {0}")]
    ErrUnsupportedCodec(&'static str),

    /// `execute_handshake` called on a DTLS bridge that failed irrecoverably.
    #[error("DTLS handshake failed: {0}")]
    ErrDtlsHandshakeFailed(String),

    /// An external service (signaling HTTP control plane) failed after
    /// exhausting its retry budget (spec.md §7 category 5).
    #[error("signaling service call failed after retries: {0}")]
    ErrSignalingServiceFailed(String),

    #[error("io error: {0}")]
    ErrIo(#[from] std::io::Error),

    #[error("sdp error: {0}")]
    ErrSdp(#[from] sdp::error::Error),

    #[error("util error: {0}")]
    ErrUtil(#[from] util::error::Error),

    #[error("rtcp error: {0}")]
    ErrRtcp(#[from] rtcp::error::Error),

    #[error("rtp error: {0}")]
    ErrRtp(#[from] rtp::error::Error),

    #[error("srtp error: {0}")]
    ErrSrtp(#[from] srtp::error::Error),

    #[error("dtls error: {0}")]
    ErrDtls(#[from] dtls::errors::Error),

    #[error("ice error: {0}")]
    ErrIce(#[from] ice::Error),

    #[error("other: {0}")]
    ErrOther(String),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Signaling-channel collaborator interface (spec.md §6).
//!
//! The signaling control/event plane (HTTPS control plane + WebSocket event
//! plane against a Kinesis Video Signaling Channel) is an external
//! collaborator; this module only specifies the shape the core exchanges
//! with it. Grounded on the original C reference's
//! `signaling_controller.h`/`signaling_controller_data_types.h`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tagged message types exchanged with the signaling controller, both
/// directions (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    SdpOffer,
    SdpAnswer,
    IceCandidate,
    ReconnectIceServer,
    StatusResponse,
}

/// An inbound or outbound signaling message. `payload` is the
/// base64-decoded body (SDP text, or an `IceCandidateInit` JSON document);
/// decoding/encoding the base64 envelope itself is the signaling
/// collaborator's job, not the core's.
#[derive(Debug, Clone)]
pub struct SignalingMessage {
    pub message_type: MessageType,
    /// Opaque remote-client identifier, ≤ 256 bytes (spec.md §3).
    pub remote_client_id: String,
    pub correlation_id: Option<String>,
    pub payload: Vec<u8>,
}

impl SignalingMessage {
    pub fn validate(&self) -> Result<()> {
        if self.remote_client_id.len() > 256 {
            return Err(crate::error::Error::ErrClientIdTooLong);
        }
        Ok(())
    }
}

/// The JSON envelope ICE candidates are trickled in, per spec.md §6:
/// `{"candidate":"candidate:<foundation> 1 udp <priority> <ip> <port> typ
/// <type> ...","sdpMid":"0","sdpMLineIndex":0}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
}

/// Implemented by the embedding application's signaling client. The core
/// only ever calls `send_message`; everything inbound arrives as a
/// callback the application drives (spec.md §6 says messages are
/// "delivered as whole callbacks", not polled).
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn send_message(&self, message: SignalingMessage) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_init_round_trips_through_json() {
        let init = IceCandidateInit {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.5 54321 typ host".to_owned(),
            sdp_mid: "0".to_owned(),
            sdp_mline_index: 0,
        };
        let encoded = serde_json::to_string(&init).unwrap();
        let decoded: IceCandidateInit = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.candidate, init.candidate);
        assert_eq!(decoded.sdp_mline_index, 0);
    }

    #[test]
    fn oversized_client_id_is_rejected() {
        let msg = SignalingMessage {
            message_type: MessageType::SdpOffer,
            remote_client_id: "x".repeat(257),
            correlation_id: None,
            payload: vec![],
        };
        assert!(msg.validate().is_err());
    }
}

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Embedded WebRTC media-plane endpoint: ICE, DTLS-SRTP, SRTP and the RTP
//! jitter buffer wired together behind a per-peer session orchestrator, for
//! peers that exchange an SDP offer/answer and trickled ICE candidates over
//! an AWS Kinesis Video Signaling Channel.

// re-export the protocol crates the core is built on, same as the teacher
// crate re-exports its own sub-crates.
pub use dtls;
pub use ice;
pub use rtcp;
pub use rtp;
pub use sdp;
pub use srtp;
pub use stun;
pub use turn;
pub use util;

pub mod certificate;
pub mod config;
pub mod dtls_bridge;
pub mod endpoint;
pub mod error;
pub mod ice_transport;
pub mod media_source;
pub mod rtp_jitter;
pub mod sdp_bridge;
pub mod session;
pub mod signaling;
pub mod srtp_session;

pub use config::EndpointConfig;
pub use endpoint::Endpoint;
pub use error::{Error, Result};

/// Equal to UDP MTU minus IP/UDP headroom, matching the teacher's receive
/// buffer sizing.
pub(crate) const RECEIVE_MTU: usize = 1460;

/// Maximum size of a single outbound RTP payload (spec.md §4.4 step 2).
pub(crate) const MAX_RTP_PAYLOAD_SIZE: usize = 1200;

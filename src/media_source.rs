//! Media source/sink collaborator interface (spec.md §6). The frame
//! producer (file or GStreamer-backed) and consumer live outside the core;
//! this module specifies the boundary.

use async_trait::async_trait;

use crate::session::transceiver::Kind;

/// One encoded access unit handed to the core for packetization, or
/// delivered to the sink after jitter-buffer reassembly.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: Kind,
    pub data: Vec<u8>,
    /// Presentation time in microseconds, used to derive the RTP timestamp
    /// (spec.md §4.4 step 1).
    pub presentation_time_us: u64,
}

/// Callbacks the media source registers per transceiver (spec.md §6
/// `init_transceiver`).
#[async_trait]
pub trait MediaSourceCallbacks: Send + Sync {
    /// Fired once the session reaches `ConnectionReady` for this kind.
    async fn on_peer_ready(&self, kind: Kind);
    /// Fired on session teardown, always, for every active transceiver
    /// (spec.md §7 "Session destruction always emits peer-closed").
    async fn on_peer_closed(&self, kind: Kind);
    /// TWCC-driven bitrate update (spec.md §4.4); no-op if TWCC is disabled.
    async fn on_bitrate_modified(&self, kind: Kind, target_bps: u32);
    /// PLI/FIR notification so the source can emit a keyframe.
    async fn on_picture_loss(&self, kind: Kind);
}

/// The sink side: receives reassembled access units from the jitter buffer.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn on_frame_ready(&self, frame: Frame);
}

//! RTP/RTCP codec: packetization, jitter-buffered reassembly, and the
//! loss-recovery/rate-control RTCP handlers that ride on top of them
//! (spec.md §4.4, §4.5, §4.6).

pub mod jitter_buffer;
pub mod packetize;
pub mod rolling_buffer;
pub mod rtcp_handler;

pub use jitter_buffer::{JitterBuffer, JitterEvent};
pub use packetize::FramePayloader;
pub use rolling_buffer::RollingBuffer;
pub use rtcp_handler::{handle_rtcp, BitrateUpdate, NackedSequence, RtcpOutcome, TwccRateController};

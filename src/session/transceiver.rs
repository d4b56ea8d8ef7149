//! Transceiver data model (spec.md §3).

use std::sync::Arc;

use rand::RngCore;

use crate::media_source::MediaSourceCallbacks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Audio,
    Video,
}

impl Kind {
    /// RTP clock rate for this kind's negotiated codec (spec.md §4.4 step 1).
    /// Audio defaults to Opus (48000); G.711 (8000) is substituted by the
    /// orchestrator once the negotiated codec is known.
    pub fn default_clock_rate(&self) -> u32 {
        match self {
            Kind::Video => 90_000,
            Kind::Audio => 48_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SendOnly,
    RecvOnly,
    SendRecv,
}

bitflags::bitflags! {
    /// Enabled-codec bitmap (spec.md §3).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CodecSet: u8 {
        const H264   = 0b0000_0001;
        const H265   = 0b0000_0010;
        const VP8    = 0b0000_0100;
        const OPUS   = 0b0000_1000;
        const G711_U = 0b0001_0000;
        const G711_A = 0b0010_0000;
    }
}

/// One audio or video transceiver (spec.md §3). Owned by its `PeerSession`.
pub struct Transceiver {
    pub kind: Kind,
    pub direction: Direction,
    pub enabled_codecs: CodecSet,
    /// Negotiated codec name once SDP negotiation completes (spec.md §4.7).
    pub negotiated_codec: Option<String>,
    pub clock_rate: u32,
    pub stream_id: String,
    pub track_id: String,

    /// Randomized at transceiver creation (spec.md §3).
    pub send_ssrc: u32,
    pub rtx_ssrc: u32,
    /// RTX payload type, when distinct from the primary payload type
    /// (spec.md §3, §4.4). `None` means RTX reuses the primary PT.
    pub rtx_payload_type: Option<u8>,
    pub payload_type: u8,

    /// Monotonic, wrapping outbound sequence counters.
    pub next_sequence: u16,
    pub next_rtx_sequence: u16,

    /// TWCC extension id negotiated from SDP, if enabled.
    pub twcc_ext_id: Option<u8>,
    pub next_twcc_sequence: u16,

    /// Rolling-buffer sizing inputs (spec.md §3): bit rate × duration.
    pub target_bitrate_bps: u32,
    pub min_bitrate_bps: u32,
    pub max_bitrate_bps: u32,
    pub rolling_buffer_duration_secs: f32,

    pub callbacks: Option<Arc<dyn MediaSourceCallbacks>>,
}

impl Transceiver {
    pub fn new(kind: Kind, direction: Direction, enabled_codecs: CodecSet) -> Self {
        let mut rng = rand::thread_rng();
        let (min_bitrate_bps, max_bitrate_bps, target_bitrate_bps) = match kind {
            Kind::Video => (128_000, 4_000_000, 1_000_000),
            Kind::Audio => (16_000, 64_000, 32_000),
        };
        Transceiver {
            kind,
            direction,
            enabled_codecs,
            negotiated_codec: None,
            clock_rate: kind.default_clock_rate(),
            stream_id: String::new(),
            track_id: String::new(),
            send_ssrc: rng.next_u32(),
            rtx_ssrc: rng.next_u32(),
            rtx_payload_type: None,
            payload_type: 0,
            next_sequence: (rng.next_u32() & 0xffff) as u16,
            next_rtx_sequence: (rng.next_u32() & 0xffff) as u16,
            twcc_ext_id: None,
            next_twcc_sequence: 0,
            target_bitrate_bps,
            min_bitrate_bps,
            max_bitrate_bps,
            rolling_buffer_duration_secs: 3.0,
            callbacks: None,
        }
    }

    /// Next outbound sequence number, wrapping at 2^16 (spec.md §4.4 step 3).
    pub fn take_sequence(&mut self) -> u16 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    pub fn take_rtx_sequence(&mut self) -> u16 {
        let seq = self.next_rtx_sequence;
        self.next_rtx_sequence = self.next_rtx_sequence.wrapping_add(1);
        seq
    }

    /// RTP timestamp from a presentation time in microseconds (spec.md §4.4
    /// step 1).
    pub fn timestamp_from_presentation_us(&self, presentation_us: u64) -> u32 {
        ((presentation_us as u128 * self.clock_rate as u128) / 1_000_000) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_wraps_at_2_16() {
        let mut t = Transceiver::new(Kind::Video, Direction::SendOnly, CodecSet::H264);
        t.next_sequence = u16::MAX;
        assert_eq!(t.take_sequence(), u16::MAX);
        assert_eq!(t.next_sequence, 0);
    }

    #[test]
    fn timestamp_scales_by_clock_rate() {
        let mut t = Transceiver::new(Kind::Audio, Direction::SendOnly, CodecSet::OPUS);
        t.clock_rate = 48_000;
        // 20ms @ 48kHz = 960 samples
        assert_eq!(t.timestamp_from_presentation_us(20_000), 960);
    }
}

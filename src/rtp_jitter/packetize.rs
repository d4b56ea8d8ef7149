//! Codec-specific packetization (spec.md §4.4 step 2, §4.6).
//!
//! Thin glue over the `rtp` crate's `Payloader`/`Depacketizer`
//! implementations: `H264Payloader`/`H264Packet` (RFC 6184 STAP-A/FU-A),
//! `OpusPayloader`/`OpusPacket`, and `G7xxPayloader` for both G.711 laws
//! (one packet per ptime, as spec.md §4.6 requires).

use bytes::Bytes;
use rtp::codecs::{g7xx::G711Payloader, h264::H264Payloader, opus::OpusPayloader};
use rtp::packetizer::Payloader;

use crate::config::{AudioCodec, VideoCodec};
use crate::error::{Error, Result};

/// Selects the `rtp` crate payloader for the transceiver's negotiated
/// codec. VP8 write-path packetization is out of scope (spec.md §4.6).
/// H.265 has no outbound payloader here: the `rtp` crate ships RFC 7798
/// NAL/AP/FU types for depacketizing H.265 but no `Payloader` that emits
/// them, and H.265's 2-byte NAL header and FU type 49 are not
/// bit-compatible with H.264's STAP-A/FU-A framing, so reusing
/// `H264Payloader` would put structurally wrong bytes on the wire. Callers
/// get an explicit error instead (see DESIGN.md).
pub enum FramePayloader {
    H264(H264Payloader),
    Opus(OpusPayloader),
    G711(G711Payloader),
}

impl FramePayloader {
    pub fn for_video(codec: VideoCodec) -> Result<Self> {
        match codec {
            VideoCodec::H264 => Ok(FramePayloader::H264(H264Payloader::default())),
            VideoCodec::H265 => Err(Error::ErrUnsupportedCodec("H265")),
        }
    }

    pub fn for_audio(codec: AudioCodec) -> Self {
        match codec {
            AudioCodec::Opus => FramePayloader::Opus(OpusPayloader),
            AudioCodec::G711Mu | AudioCodec::G711A => FramePayloader::G711(G711Payloader::default()),
        }
    }

    /// Splits one encoded access unit into an ordered sequence of RTP
    /// payloads no larger than `mtu` bytes (spec.md §4.4 step 2). The
    /// caller is responsible for stamping RTP headers and the marker bit
    /// on the last payload.
    pub fn payload(&mut self, mtu: usize, frame: &Bytes) -> Result<Vec<Bytes>> {
        let payloads = match self {
            FramePayloader::H264(p) => p.payload(mtu, frame)?,
            FramePayloader::Opus(p) => p.payload(mtu, frame)?,
            FramePayloader::G711(p) => p.payload(mtu, frame)?,
        };
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_emits_one_packet_per_frame() {
        let mut payloader = FramePayloader::for_audio(AudioCodec::Opus);
        let frame = Bytes::from_static(&[1, 2, 3, 4]);
        let payloads = payloader.payload(1200, &frame).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0], frame);
    }

    #[test]
    fn h264_fragments_above_mtu() {
        let mut payloader = FramePayloader::for_video(VideoCodec::H264).unwrap();
        // single NAL unit (type 5, IDR slice) larger than a tiny MTU
        let mut nalu = vec![0x65u8];
        nalu.extend(std::iter::repeat(0xAB).take(50));
        let frame = Bytes::from(nalu);
        let payloads = payloader.payload(16, &frame).unwrap();
        assert!(payloads.len() > 1, "expected FU-A fragmentation above MTU");
    }

    #[test]
    fn h265_has_no_outbound_payloader() {
        assert!(matches!(
            FramePayloader::for_video(VideoCodec::H265),
            Err(Error::ErrUnsupportedCodec("H265"))
        ));
    }
}

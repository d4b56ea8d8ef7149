//! Inbound RTCP dispatch: NACK-driven retransmission and TWCC-driven rate
//! control (spec.md §4.4, §4.6). SR/RR/SLI/REMB are parsed only far enough
//! to avoid logging them as unknown; they carry no further behavior here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rtcp::packet::unmarshal;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::transport_feedbacks::transport_layer_cc::TransportLayerCc;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;

use crate::error::Result;
use crate::session::transceiver::{Kind, Transceiver};

/// Rolling-buffer lookup performed on a NACK hit (spec.md §4.4 "Retransmission").
/// `(sequence, was_rtx_distinct)` identifies what to resend; the caller owns
/// the actual resend (it needs the SRTP context).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackedSequence(pub u16);

/// One 1 s TWCC tick's outcome (spec.md §4.4 "TWCC").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateUpdate {
    pub new_target_bps: u32,
}

/// Accumulates TWCC loss-rate EMA and applies the 1 s rate-control tick
/// (spec.md §4.4 "TWCC (outbound feedback-driven rate control)").
pub struct TwccRateController {
    ema_loss_rate: f64,
    last_tick: Instant,
}

const EMA_ALPHA: f64 = 0.05;
const TICK_INTERVAL: Duration = Duration::from_secs(1);

impl TwccRateController {
    pub fn new() -> Self {
        TwccRateController {
            ema_loss_rate: 0.0,
            last_tick: Instant::now(),
        }
    }

    /// Folds one TWCC feedback packet's observed loss rate into the EMA.
    /// `recv_deltas` is only populated for statuses other than
    /// `PacketNotReceived`, so the gap between `packet_status_count` and
    /// `recv_deltas.len()` approximates the packets reported lost in this
    /// feedback interval.
    fn fold_loss_rate(&mut self, twcc: &TransportLayerCc) {
        if twcc.packet_status_count == 0 {
            return;
        }
        let lost = twcc.packet_status_count as usize - twcc.recv_deltas.len();
        let sample = lost as f64 / twcc.packet_status_count as f64;
        self.ema_loss_rate = EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * self.ema_loss_rate;
    }

    /// Whether a full tick has elapsed since the last one; resets the
    /// clock if so. Folding loss-rate samples is independent of this so a
    /// compound packet carrying several TWCC sub-packets only ever folds
    /// each sample once, regardless of how many transceivers subsequently
    /// have the tick applied to them.
    fn tick_due(&mut self) -> bool {
        if self.last_tick.elapsed() < TICK_INTERVAL {
            return false;
        }
        self.last_tick = Instant::now();
        true
    }

    /// Applies the current loss-rate EMA to one transceiver's target
    /// bitrate, clamped to its own min/max (spec.md §4.4 "clamped to
    /// per-kind min/max"). Called once per transceiver on every tick so
    /// every transceiver's target bitrate moves together, not just
    /// whichever one happened to be visited first.
    fn apply(&self, transceiver: &mut Transceiver) -> BitrateUpdate {
        let current = transceiver.target_bitrate_bps as f64;
        let adjusted = if self.ema_loss_rate <= 0.05 {
            current * 1.05
        } else {
            current * (1.0 - self.ema_loss_rate)
        };

        let clamped = (adjusted as u32)
            .max(transceiver.min_bitrate_bps)
            .min(transceiver.max_bitrate_bps);
        transceiver.target_bitrate_bps = clamped;

        BitrateUpdate {
            new_target_bps: clamped,
        }
    }
}

impl Default for TwccRateController {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of dispatching one batch of inbound RTCP (spec.md §4.4, §4.6).
#[derive(Debug, Default)]
pub struct RtcpOutcome {
    pub nacked: Vec<NackedSequence>,
    pub bitrate_update: Option<BitrateUpdate>,
    pub picture_loss: bool,
}

/// Unmarshals one compound SRTCP packet once and routes every sub-packet
/// to whichever transceiver its `media_ssrc` names, returning one outcome
/// per transceiver kind that had anything happen (spec.md §4.6 "RTCP").
/// A single compound packet can legitimately carry feedback for both
/// kinds at once (e.g. a video NACK alongside an audio PLI, or a
/// transport-wide TWCC report that applies to every transceiver) — the
/// packet is decoded once and every transceiver is matched against it, so
/// no kind's feedback is dropped in favor of another's, and the TWCC loss
/// sample is folded into the shared EMA exactly once regardless of how
/// many transceivers exist. Unknown packet types are ignored, never
/// fatal.
pub fn handle_rtcp(
    payload: &Bytes,
    twcc: &mut TwccRateController,
    transceivers: &mut HashMap<Kind, Transceiver>,
) -> Result<HashMap<Kind, RtcpOutcome>> {
    let mut buf = payload.clone();
    let packets = unmarshal(&mut buf)?;

    let mut outcomes: HashMap<Kind, RtcpOutcome> = HashMap::new();
    let mut saw_twcc = false;

    for packet in packets {
        if let Some(nack) = packet.as_any().downcast_ref::<TransportLayerNack>() {
            if let Some(kind) = kind_for_ssrc(transceivers, nack.media_ssrc) {
                let outcome = outcomes.entry(kind).or_default();
                for pair in &nack.nacks {
                    for seq in pair.packet_list() {
                        outcome.nacked.push(NackedSequence(seq));
                    }
                }
            }
        } else if let Some(cc) = packet.as_any().downcast_ref::<TransportLayerCc>() {
            twcc.fold_loss_rate(cc);
            saw_twcc = true;
        } else if let Some(pli) = packet.as_any().downcast_ref::<PictureLossIndication>() {
            if let Some(kind) = kind_for_ssrc(transceivers, pli.media_ssrc) {
                outcomes.entry(kind).or_default().picture_loss = true;
            }
        }
        // SR/RR/SLI/REMB: no behavior beyond acceptance (spec.md §4.6).
    }

    if saw_twcc && twcc.tick_due() {
        for (&kind, transceiver) in transceivers.iter_mut() {
            let update = twcc.apply(transceiver);
            outcomes.entry(kind).or_default().bitrate_update = Some(update);
        }
    }

    Ok(outcomes)
}

fn kind_for_ssrc(transceivers: &HashMap<Kind, Transceiver>, ssrc: u32) -> Option<Kind> {
    transceivers
        .iter()
        .find(|(_, t)| t.send_ssrc == ssrc)
        .map(|(&kind, _)| kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transceiver::{CodecSet, Direction, Kind};

    fn sample_transceiver() -> Transceiver {
        let mut t = Transceiver::new(Kind::Video, Direction::SendOnly, CodecSet::H264);
        t.target_bitrate_bps = 1_000_000;
        t.min_bitrate_bps = 128_000;
        t.max_bitrate_bps = 4_000_000;
        t
    }

    /// spec.md §8 seed scenario 4: 12% loss should drop target bitrate by
    /// at least 10% on the next tick and never below the configured floor.
    #[test]
    fn high_loss_rate_reduces_bitrate_within_floor() {
        let mut transceiver = sample_transceiver();
        let mut controller = TwccRateController::new();
        controller.ema_loss_rate = 0.12;
        controller.last_tick = Instant::now() - Duration::from_secs(2);

        assert!(controller.tick_due());
        let update = controller.apply(&mut transceiver);
        assert!(update.new_target_bps <= (1_000_000f64 * 0.90) as u32);
        assert!(update.new_target_bps >= transceiver.min_bitrate_bps);
    }

    #[test]
    fn low_loss_rate_raises_bitrate() {
        let mut transceiver = sample_transceiver();
        let mut controller = TwccRateController::new();
        controller.ema_loss_rate = 0.0;
        controller.last_tick = Instant::now() - Duration::from_secs(2);

        assert!(controller.tick_due());
        let update = controller.apply(&mut transceiver);
        assert_eq!(update.new_target_bps, 1_050_000);
    }

    #[test]
    fn tick_is_not_due_before_the_interval_elapses() {
        let mut controller = TwccRateController::new();
        assert!(!controller.tick_due());
    }

    #[test]
    fn a_tick_updates_every_transceiver_not_just_the_first() {
        let mut video = sample_transceiver();
        let mut audio = Transceiver::new(Kind::Audio, Direction::SendOnly, CodecSet::OPUS);
        audio.target_bitrate_bps = 32_000;
        audio.min_bitrate_bps = 16_000;
        audio.max_bitrate_bps = 64_000;

        let mut transceivers = HashMap::new();
        video.send_ssrc = 111;
        audio.send_ssrc = 222;
        transceivers.insert(Kind::Video, video);
        transceivers.insert(Kind::Audio, audio);

        let mut controller = TwccRateController::new();
        controller.last_tick = Instant::now() - Duration::from_secs(2);
        controller.ema_loss_rate = 0.0;

        assert!(controller.tick_due());
        for transceiver in transceivers.values_mut() {
            controller.apply(transceiver);
        }

        assert_eq!(transceivers[&Kind::Video].target_bitrate_bps, 1_050_000);
        assert_eq!(transceivers[&Kind::Audio].target_bitrate_bps, 33_600);
    }
}

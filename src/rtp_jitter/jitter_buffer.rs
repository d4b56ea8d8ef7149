//! Per-SSRC jitter buffer (spec.md §4.5).
//!
//! Ordered assembly over the modulo-2^16 sequence space with wrap-around
//! detection, frame-ready/frame-drop policy, and reassembly through the
//! `rtp` crate's `Depacketizer` implementations. Single-owner (the
//! session task); no internal lock, matching spec.md §4.5 "Concurrency".

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use rtp::codecs::h264::H264Packet;
use rtp::packetizer::Depacketizer;

use crate::error::Result;
use crate::session::transceiver::Kind;

/// Sequence numbers within this distance of the newest entry are treated
/// as a forward wrap rather than stale (spec.md §4.5).
const WRAP_THRESHOLD: u16 = 1024;

#[derive(Debug, Clone)]
pub struct JitterEntry {
    pub seq: u16,
    pub timestamp: u32,
    pub arrival_tick: std::time::Instant,
    pub payload: Bytes,
    pub is_start: bool,
    pub is_end: bool,
}

/// The result of a `push`: either nothing new is ready yet, a contiguous
/// frame became assemblable, or an incomplete run aged out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitterEvent {
    None,
    FrameReady { start_seq: u16, end_seq: u16 },
    FrameDropped { start_seq: u16, end_seq: u16 },
}

enum CodecDepacketizer {
    H264(H264Packet),
    /// One packet per access unit; every packet both starts and ends its
    /// own frame (spec.md §4.5 "always true for one-packet-per-frame
    /// codecs such as Opus/G.711").
    OnePerPacket,
}

impl CodecDepacketizer {
    fn flags(&mut self, payload: &Bytes, marker: bool) -> (bool, bool) {
        match self {
            CodecDepacketizer::H264(p) => {
                (p.is_partition_head(payload), p.is_partition_tail(marker, payload))
            }
            CodecDepacketizer::OnePerPacket => (true, true),
        }
    }

    fn depacketize(&mut self, payload: &Bytes) -> Result<Bytes> {
        Ok(match self {
            CodecDepacketizer::H264(p) => p.depacketize(payload)?,
            CodecDepacketizer::OnePerPacket => payload.clone(),
        })
    }
}

/// Per-stream jitter buffer keyed by SSRC (spec.md §4.5).
pub struct JitterBuffer {
    pub ssrc: u32,
    pub clock_rate: u32,
    pub buffer_duration_secs: f32,
    entries: BTreeMap<u16, JitterEntry>,
    newest_seq: Option<u16>,
    newest_timestamp: Option<u32>,
    last_delivered_seq: Option<u16>,
    depacketizer: CodecDepacketizer,
}

impl JitterBuffer {
    pub fn new(ssrc: u32, kind: Kind, clock_rate: u32, buffer_duration_secs: f32) -> Self {
        let depacketizer = match kind {
            Kind::Video => CodecDepacketizer::H264(H264Packet::default()),
            Kind::Audio => CodecDepacketizer::OnePerPacket,
        };
        JitterBuffer {
            ssrc,
            clock_rate,
            buffer_duration_secs,
            entries: BTreeMap::new(),
            newest_seq: None,
            newest_timestamp: None,
            last_delivered_seq: None,
            depacketizer,
        }
    }

    /// Forward wrap-aware "is a newer than b" comparison (spec.md §4.5).
    fn is_newer(a: u16, b: u16) -> bool {
        a.wrapping_sub(b) != 0 && a.wrapping_sub(b) < WRAP_THRESHOLD
    }

    /// Inserts a packet at its sequence position and reevaluates
    /// frame-ready / frame-drop (spec.md §4.5 `push`).
    pub fn push(
        &mut self,
        seq: u16,
        timestamp: u32,
        payload: Bytes,
        marker: bool,
    ) -> Result<JitterEvent> {
        if let Some(last) = self.last_delivered_seq {
            if !Self::is_newer(seq, last) && seq != last {
                // Out-of-order late packet older than the last delivered
                // frame: discard (spec.md §4.5 "Frame-drop policy").
                return Ok(JitterEvent::None);
            }
        }

        let (is_start, is_end) = self.depacketizer.flags(&payload, marker);

        self.entries.insert(
            seq,
            JitterEntry {
                seq,
                timestamp,
                arrival_tick: std::time::Instant::now(),
                payload,
                is_start,
                is_end,
            },
        );

        if self.newest_seq.map(|n| Self::is_newer(seq, n)).unwrap_or(true) {
            self.newest_seq = Some(seq);
            self.newest_timestamp = Some(timestamp);
        }

        let dropped = self.evict_aged_out();
        if let Some(event) = dropped {
            return Ok(event);
        }

        Ok(self.find_ready_run().unwrap_or(JitterEvent::None))
    }

    /// Evicts entries older than `buffer_duration_secs` relative to the
    /// newest packet's timestamp (spec.md §4.5 "Frame-drop policy").
    fn evict_aged_out(&mut self) -> Option<JitterEvent> {
        let newest_ts = self.newest_timestamp?;
        let max_age_ticks = (self.buffer_duration_secs * self.clock_rate as f32) as u32;

        let stale: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, e)| newest_ts.wrapping_sub(e.timestamp) > max_age_ticks)
            .map(|(seq, _)| *seq)
            .collect();

        if stale.is_empty() {
            return None;
        }

        let start = *stale.first().unwrap();
        let end = *stale.last().unwrap();
        let broke_incomplete_run = stale.iter().any(|seq| {
            self.entries
                .get(seq)
                .map(|e| !e.is_start || !e.is_end)
                .unwrap_or(false)
        }) && stale.len() > 1;

        for seq in &stale {
            self.entries.remove(seq);
        }

        if broke_incomplete_run {
            Some(JitterEvent::FrameDropped {
                start_seq: start,
                end_seq: end,
            })
        } else {
            None
        }
    }

    /// A contiguous run from a start-flagged to an end-flagged packet with
    /// every intervening sequence number present is ready (spec.md §4.5).
    ///
    /// `entries` is keyed by raw `u16` sequence number, so its `BTreeMap`
    /// iteration order is plain numeric order, not sequence order: a run
    /// that straddles the 16-bit wraparound (e.g. 65534, 65535, 0, 1, 2)
    /// would otherwise show up as two disjoint fragments (`0..=2` ahead of
    /// `65534..=65535`) and never be recognized as contiguous. Entries are
    /// re-sorted here by their wrap-aware distance from a point
    /// `WRAP_THRESHOLD` behind the newest sequence seen, the same notion of
    /// "forward" `is_newer`/`evict_aged_out` already use, so the walk below
    /// sees packets in actual arrival/sequence order regardless of where in
    /// the `u16` space they land.
    fn find_ready_run(&self) -> Option<JitterEvent> {
        let newest = self.newest_seq?;
        let base = newest.wrapping_sub(WRAP_THRESHOLD);
        let mut ordered: Vec<u16> = self.entries.keys().copied().collect();
        ordered.sort_by_key(|&seq| seq.wrapping_sub(base));

        let mut run_start: Option<u16> = None;
        let mut expected_next: Option<u16> = None;

        for seq in ordered {
            let entry = &self.entries[&seq];
            if let Some(expected) = expected_next {
                if seq != expected {
                    // gap: restart the run only from a start-flagged packet
                    run_start = None;
                    expected_next = None;
                }
            }
            if run_start.is_none() && entry.is_start {
                run_start = Some(seq);
            }
            if run_start.is_some() {
                expected_next = Some(seq.wrapping_add(1));
                if entry.is_end {
                    let start_seq = run_start.unwrap();
                    return Some(JitterEvent::FrameReady {
                        start_seq,
                        end_seq: seq,
                    });
                }
            }
        }
        None
    }

    /// Concatenates payloads from `start_seq` to `end_seq` through the
    /// depacketizer and returns the assembled access unit plus its RTP
    /// timestamp (spec.md §4.5 `fill_frame`).
    pub fn fill_frame(&mut self, start_seq: u16, end_seq: u16) -> Result<(Bytes, u32)> {
        let mut out = BytesMut::new();
        let mut ts = 0u32;
        let mut seq = start_seq;
        loop {
            if let Some(entry) = self.entries.remove(&seq) {
                ts = entry.timestamp;
                out.extend_from_slice(&self.depacketizer.depacketize(&entry.payload)?);
            }
            if seq == end_seq {
                break;
            }
            seq = seq.wrapping_add(1);
        }
        self.last_delivered_seq = Some(end_seq);
        Ok((out.freeze(), ts))
    }

    pub fn free(&mut self) {
        self.entries.clear();
        self.newest_seq = None;
        self.newest_timestamp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// spec.md §8 seed scenario 6: five in-order FU-A fragments of one NAL,
    /// marker on the last, expect a single ready event spanning them.
    #[test]
    fn h264_fua_fragments_produce_one_ready_event() {
        let mut jb = JitterBuffer::new(0xdead_beef, Kind::Video, 90_000, 2.0);

        // FU-A indicator byte: type 28, NRI from original NAL.
        let fu_indicator = 0x60 | 28;
        let nalu_header_type = 5u8; // IDR slice
        let start_byte = 0x80 | nalu_header_type;
        let middle_byte = nalu_header_type;
        let end_byte = 0x40 | nalu_header_type;

        let mk = |fu_header: u8| Bytes::from(vec![fu_indicator, fu_header, 0xAA, 0xBB]);

        let mut last_event = JitterEvent::None;
        for (i, seq) in (100u16..=104).enumerate() {
            let fu_header = match i {
                0 => start_byte,
                4 => end_byte,
                _ => middle_byte,
            };
            let marker = seq == 104;
            last_event = jb.push(seq, 900_000, mk(fu_header), marker).unwrap();
        }

        assert_eq!(
            last_event,
            JitterEvent::FrameReady {
                start_seq: 100,
                end_seq: 104
            }
        );

        let (assembled, ts) = jb.fill_frame(100, 104).unwrap();
        assert_eq!(ts, 900_000);
        assert!(assembled.starts_with(&[0x00, 0x00, 0x00, 0x01]));
    }

    #[test]
    fn opus_packet_is_ready_immediately() {
        let mut jb = JitterBuffer::new(1, Kind::Audio, 48_000, 2.0);
        let event = jb.push(10, 1000, Bytes::from_static(&[1, 2, 3]), true).unwrap();
        assert_eq!(
            event,
            JitterEvent::FrameReady {
                start_seq: 10,
                end_seq: 10
            }
        );
    }

    #[test]
    fn h264_fua_run_straddling_sequence_wrap_is_recognized() {
        let mut jb = JitterBuffer::new(0xdead_beef, Kind::Video, 90_000, 2.0);

        let fu_indicator = 0x60 | 28;
        let nalu_header_type = 5u8;
        let start_byte = 0x80 | nalu_header_type;
        let middle_byte = nalu_header_type;
        let end_byte = 0x40 | nalu_header_type;
        let mk = |fu_header: u8| Bytes::from(vec![fu_indicator, fu_header, 0xAA, 0xBB]);

        // 65534, 65535, 0, 1, 2 - a run that straddles the u16 wraparound.
        let seqs: [u16; 5] = [65534, 65535, 0, 1, 2];
        let mut last_event = JitterEvent::None;
        for (i, &seq) in seqs.iter().enumerate() {
            let fu_header = match i {
                0 => start_byte,
                4 => end_byte,
                _ => middle_byte,
            };
            let marker = i == 4;
            last_event = jb.push(seq, 900_000, mk(fu_header), marker).unwrap();
        }

        assert_eq!(
            last_event,
            JitterEvent::FrameReady {
                start_seq: 65534,
                end_seq: 2
            }
        );
    }

    #[test]
    fn stale_packet_older_than_last_delivered_is_discarded() {
        let mut jb = JitterBuffer::new(1, Kind::Audio, 48_000, 2.0);
        jb.push(10, 1000, Bytes::from_static(&[1]), true).unwrap();
        jb.fill_frame(10, 10).unwrap();
        let event = jb.push(5, 500, Bytes::from_static(&[2]), true).unwrap();
        assert_eq!(event, JitterEvent::None);
    }
}

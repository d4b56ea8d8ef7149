//! Rolling retransmit buffer (spec.md §3 "Rolling retransmit buffer", §4.4
//! "Retransmission"). A power-of-two ring indexed by RTP sequence number
//! modulo its size, in the spirit of the NACK responder's send buffer: old
//! slots are overwritten rather than shifted, and a NACK for an evicted
//! sequence number is simply a miss.

use std::time::Instant;

use bytes::Bytes;

/// What's kept for one outbound packet, chosen at construction time by
/// whether the transceiver's RTX payload type differs from its primary one
/// (spec.md §3).
#[derive(Clone)]
pub enum RetransmitRecord {
    /// RTX payload-type equals the primary PT: the saved SRTP ciphertext is
    /// resent byte-for-byte.
    Verbatim { srtp_packet: Bytes },
    /// RTX uses a distinct payload type: retransmission re-stamps a new
    /// header (RTX SSRC, RTX PT, RTX sequence) with the original sequence
    /// number prepended as a 2-byte OSN, so the unencrypted payload and a
    /// template of the original header are kept instead.
    Restamped {
        payload: Bytes,
        original_sequence: u16,
        timestamp: u32,
        marker: bool,
    },
}

struct Slot {
    sequence: u16,
    record: RetransmitRecord,
    sent_at: Instant,
}

/// Sized per spec.md §3: `capacity = bitrate * duration / average_packet_size`,
/// rounded up to the next power of two so sequence-to-slot mapping is a mask.
pub struct RollingBuffer {
    slots: Vec<Option<Slot>>,
    mask: u16,
    last_inserted: Option<u16>,
}

impl RollingBuffer {
    pub fn with_capacity_hint(target_bitrate_bps: u32, duration_secs: f32, avg_packet_size: u32) -> Self {
        let wanted = ((target_bitrate_bps as f32 / 8.0) * duration_secs / avg_packet_size.max(1) as f32)
            .ceil() as u32;
        let size = wanted.max(1).next_power_of_two().min(1 << 15) as u16;
        RollingBuffer {
            slots: (0..size).map(|_| None).collect(),
            mask: size - 1,
            last_inserted: None,
        }
    }

    fn index(&self, sequence: u16) -> usize {
        (sequence & self.mask) as usize
    }

    /// Records one just-sent packet, overwriting whatever previously
    /// occupied its slot (spec.md §4.2 "For every outbound RTP packet ...
    /// a rolling-buffer record ... exists for at least `rollingbuffer_duration`
    /// seconds").
    pub fn insert(&mut self, sequence: u16, record: RetransmitRecord) {
        let idx = self.index(sequence);
        self.slots[idx] = Some(Slot {
            sequence,
            record,
            sent_at: Instant::now(),
        });
        self.last_inserted = Some(sequence);
    }

    /// Looks up a sequence number for retransmission. Returns `None` both
    /// when the slot was never written and when it has since been
    /// overwritten by a newer packet (spec.md §4.4 "If the record is absent
    /// ... the NACK is silently dropped").
    pub fn get(&self, sequence: u16) -> Option<&RetransmitRecord> {
        let slot = self.slots[self.index(sequence)].as_ref()?;
        if slot.sequence != sequence {
            return None;
        }
        Some(&slot.record)
    }

    pub fn age_of(&self, sequence: u16) -> Option<std::time::Duration> {
        let slot = self.slots[self.index(sequence)].as_ref()?;
        if slot.sequence != sequence {
            return None;
        }
        Some(slot.sent_at.elapsed())
    }
}

impl std::fmt::Debug for RetransmitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetransmitRecord::Verbatim { srtp_packet } => {
                f.debug_struct("Verbatim").field("len", &srtp_packet.len()).finish()
            }
            RetransmitRecord::Restamped {
                original_sequence, ..
            } => f
                .debug_struct("Restamped")
                .field("original_sequence", original_sequence)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbatim_record_round_trips() {
        let mut buf = RollingBuffer::with_capacity_hint(1_000_000, 3.0, 1200);
        buf.insert(
            100,
            RetransmitRecord::Verbatim {
                srtp_packet: Bytes::from_static(b"ciphertext"),
            },
        );
        match buf.get(100) {
            Some(RetransmitRecord::Verbatim { srtp_packet }) => {
                assert_eq!(srtp_packet, &Bytes::from_static(b"ciphertext"))
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn overwritten_slot_is_a_miss() {
        let mut buf = RollingBuffer::with_capacity_hint(1_000, 1.0, 500);
        // tiny capacity hint still rounds up to at least 1 slot; force a
        // collision by inserting `size` sequences later.
        let size = buf.mask as u32 + 1;
        buf.insert(
            1,
            RetransmitRecord::Verbatim {
                srtp_packet: Bytes::from_static(b"first"),
            },
        );
        buf.insert(
            1 + size as u16,
            RetransmitRecord::Verbatim {
                srtp_packet: Bytes::from_static(b"second"),
            },
        );
        assert!(buf.get(1).is_none());
    }

    #[test]
    fn absent_record_is_none() {
        let buf = RollingBuffer::with_capacity_hint(1_000_000, 3.0, 1200);
        assert!(buf.get(999).is_none());
    }
}

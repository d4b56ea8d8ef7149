//! SRTP send/receive contexts and outbound/inbound packet paths (spec.md
//! §4.4). Built directly on `srtp::context::Context::encrypt_rtp`/
//! `decrypt_rtp` rather than the higher-level `srtp::session::Session`,
//! because the outbound path here needs to own each packet's rolling-buffer
//! record itself (spec.md §3 "Rolling retransmit buffer") instead of
//! delegating socket I/O to the session. Keys are derived from the DTLS
//! handshake's exported keying material (RFC 5764 §4.2), mirroring
//! `DTLSTransport::start_srtp` in the teacher.

use bytes::Bytes;
use dtls::state::State as DtlsState;
use rtp::header::Header;
use rtp::packet::Packet;
use srtp::context::Context;
use srtp::protection_profile::ProtectionProfile;
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::error::{Error, Result};
use crate::rtp_jitter::rolling_buffer::{RetransmitRecord, RollingBuffer};
use crate::session::transceiver::Transceiver;

const KEY_LEN: usize = 16;
const SALT_LEN: usize = 14;
const LABEL_EXTRACTOR_DTLS_SRTP: &str = "EXTRACTOR-dtls_srtp";

/// The four SRTP master secrets extracted from one DTLS-SRTP handshake
/// (spec.md §4.3 `populate_keying_material`).
pub struct SrtpKeys {
    pub local_master_key: Vec<u8>,
    pub local_master_salt: Vec<u8>,
    pub remote_master_key: Vec<u8>,
    pub remote_master_salt: Vec<u8>,
}

impl SrtpKeys {
    pub async fn from_dtls_state(state: &DtlsState, is_client: bool) -> Result<Self> {
        let keying_material = state
            .export_keying_material(
                LABEL_EXTRACTOR_DTLS_SRTP.to_string(),
                &[],
                2 * (KEY_LEN + SALT_LEN),
            )
            .map_err(|e| Error::ErrDtlsHandshakeFailed(e.to_string()))?;

        let mut offset = 0;
        let client_write_key = keying_material[offset..offset + KEY_LEN].to_vec();
        offset += KEY_LEN;
        let server_write_key = keying_material[offset..offset + KEY_LEN].to_vec();
        offset += KEY_LEN;
        let client_write_salt = keying_material[offset..offset + SALT_LEN].to_vec();
        offset += SALT_LEN;
        let server_write_salt = keying_material[offset..offset + SALT_LEN].to_vec();

        Ok(if is_client {
            SrtpKeys {
                local_master_key: client_write_key,
                local_master_salt: client_write_salt,
                remote_master_key: server_write_key,
                remote_master_salt: server_write_salt,
            }
        } else {
            SrtpKeys {
                local_master_key: server_write_key,
                local_master_salt: server_write_salt,
                remote_master_key: client_write_key,
                remote_master_salt: client_write_salt,
            }
        })
    }
}

/// One transceiver's transmit-side SRTP state: encryption context plus the
/// rolling retransmit buffer it feeds (spec.md §4.4 "Outbound path").
pub struct SendContext {
    context: Context,
    pub rolling_buffer: RollingBuffer,
}

impl SendContext {
    pub fn new(keys: &SrtpKeys, profile: ProtectionProfile, transceiver: &Transceiver) -> Result<Self> {
        let context = Context::new(
            &keys.local_master_key,
            &keys.local_master_salt,
            profile,
            None,
            None,
        )?;
        let rolling_buffer = RollingBuffer::with_capacity_hint(
            transceiver.target_bitrate_bps,
            transceiver.rolling_buffer_duration_secs,
            200,
        );
        Ok(SendContext {
            context,
            rolling_buffer,
        })
    }

    /// Stamps an RTP header and protects one packetized payload, saving the
    /// record needed to answer a later NACK (spec.md §4.4 steps 3-6).
    pub fn protect_and_buffer(
        &mut self,
        transceiver: &mut Transceiver,
        payload: Bytes,
        marker: bool,
        timestamp: u32,
    ) -> Result<Bytes> {
        let sequence_number = transceiver.take_sequence();
        let header = Header {
            version: 2,
            payload_type: transceiver.payload_type,
            sequence_number,
            timestamp,
            ssrc: transceiver.send_ssrc,
            marker,
            ..Default::default()
        };
        let packet = Packet { header, payload };
        let serialized = packet.marshal()?;
        let protected = self.context.encrypt_rtp(&serialized)?;

        let record = if transceiver.rtx_payload_type.is_none() {
            RetransmitRecord::Verbatim {
                srtp_packet: protected.clone(),
            }
        } else {
            RetransmitRecord::Restamped {
                payload: packet.payload.clone(),
                original_sequence: sequence_number,
                timestamp,
                marker,
            }
        };
        self.rolling_buffer.insert(sequence_number, record);

        Ok(protected)
    }

    /// Resolves one NACKed sequence number into ciphertext to resend
    /// (spec.md §4.4 "Retransmission").
    pub fn resend(&mut self, transceiver: &mut Transceiver, sequence: u16) -> Result<Option<Bytes>> {
        let record = match self.rolling_buffer.get(sequence) {
            Some(r) => r.clone(),
            None => return Ok(None),
        };

        match record {
            RetransmitRecord::Verbatim { srtp_packet } => Ok(Some(srtp_packet)),
            RetransmitRecord::Restamped {
                payload,
                original_sequence,
                timestamp,
                marker,
            } => {
                let mut osn_payload = bytes::BytesMut::with_capacity(2 + payload.len());
                osn_payload.extend_from_slice(&original_sequence.to_be_bytes());
                osn_payload.extend_from_slice(&payload);

                let rtx_seq = transceiver.take_rtx_sequence();
                let header = Header {
                    version: 2,
                    payload_type: transceiver.rtx_payload_type.unwrap(),
                    sequence_number: rtx_seq,
                    timestamp,
                    ssrc: transceiver.rtx_ssrc,
                    marker,
                    ..Default::default()
                };
                let packet = Packet {
                    header,
                    payload: osn_payload.freeze(),
                };
                let serialized = packet.marshal()?;
                Ok(Some(self.context.encrypt_rtp(&serialized)?))
            }
        }
    }
}

/// One transceiver's receive-side SRTP state: decryption context plus
/// nothing else — reassembly is the jitter buffer's job (spec.md §4.4
/// "Inbound path").
pub struct ReceiveContext {
    context: Context,
}

impl ReceiveContext {
    pub fn new(keys: &SrtpKeys, profile: ProtectionProfile) -> Result<Self> {
        let context = Context::new(
            &keys.remote_master_key,
            &keys.remote_master_salt,
            profile,
            None,
            None,
        )?;
        Ok(ReceiveContext { context })
    }

    /// Unprotects one inbound SRTP packet and returns its header and
    /// plaintext payload for routing by SSRC into a jitter buffer.
    pub fn unprotect(&mut self, encrypted: &[u8]) -> Result<(Header, Bytes)> {
        let decrypted = self.context.decrypt_rtp(encrypted)?;
        let mut buf = decrypted.clone();
        let header = Header::unmarshal(&mut buf)?;
        let payload = decrypted.slice(header.marshal_size()..);
        Ok((header, payload))
    }

    pub fn unprotect_rtcp(&mut self, encrypted: &[u8]) -> Result<Bytes> {
        Ok(self.context.decrypt_rtcp(encrypted)?)
    }
}

#[cfg(test)]
mod tests {
    // `SendContext`/`ReceiveContext` need real DTLS-derived keys to exercise
    // end to end; `RollingBuffer` and header-stamping logic are covered
    // directly in `rtp_jitter::rolling_buffer` and `session::transceiver`.
}

//! First-byte demultiplexer over the ICE-nominated transport (spec.md §4.2
//! "socket listener loop"):
//!
//! ```text
//! B in [0,3]     -> STUN/TURN           -> handled inside ice::Agent already
//! B in [20,63]   -> DTLS                -> dtls_bridge
//! B in [64,79]   -> TURN channel-data   -> handled inside ice::Agent already
//! B in [128,191] -> SRTP/SRTCP          -> srtp_session
//! ```
//!
//! The teacher demultiplexes the same way but through its own internal,
//! unpublished `util::mux::Mux`/`MatchFunc`; since that module never shipped
//! in the published `webrtc-util` crate, this is a direct, minimal
//! equivalent: each endpoint is a `Conn` that shares the single underlying
//! socket for writes and is handed only the reads matching its byte range.
//! STUN and TURN channel-data never reach here because `ice::Agent` already
//! consumes them before the nominated `Conn` hands bytes back to callers
//! (`ice::agent::agent_transport::AgentConn` only returns non-STUN payload),
//! so this demux only needs to split DTLS from SRTP/SRTCP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use util::Conn;

/// First byte of a DTLS record (ContentType) lands in this range (RFC 6347).
const DTLS_RANGE: std::ops::RangeInclusive<u8> = 20..=63;
/// First byte of an SRTP/SRTCP packet's version+padding+... byte (RFC 3550 V=2).
const SRTP_RANGE: std::ops::RangeInclusive<u8> = 128..=191;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Dtls,
    Srtp,
}

fn classify(first_byte: u8) -> Option<Channel> {
    if DTLS_RANGE.contains(&first_byte) {
        Some(Channel::Dtls)
    } else if SRTP_RANGE.contains(&first_byte) {
        Some(Channel::Srtp)
    } else {
        None
    }
}

/// Reads from `transport` in a loop and fans each datagram out to whichever
/// endpoint's queue matches its first byte. Runs for the lifetime of the
/// session; exits when `transport.recv` errors (peer closed / ICE torn down).
pub fn spawn_demux(
    transport: Arc<dyn Conn + Send + Sync>,
    dtls_tx: mpsc::Sender<Vec<u8>>,
    srtp_tx: mpsc::Sender<Vec<u8>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; crate::RECEIVE_MTU];
        loop {
            let n = match transport.recv(&mut buf).await {
                Ok(n) => n,
                Err(_) => return,
            };
            if n == 0 {
                continue;
            }
            match classify(buf[0]) {
                Some(Channel::Dtls) => {
                    if dtls_tx.send(buf[..n].to_vec()).await.is_err() {
                        return;
                    }
                }
                Some(Channel::Srtp) => {
                    if srtp_tx.send(buf[..n].to_vec()).await.is_err() {
                        return;
                    }
                }
                None => { /* stray STUN retransmit or unrelated datagram: drop */ }
            }
        }
    })
}

/// A `Conn` endpoint that writes straight through to the shared transport
/// and reads from the demultiplexed queue handed to it by [`spawn_demux`].
/// Grounded on the shape of the teacher's `mux::endpoint::Endpoint`, minus
/// the match-function registry since this demux only ever needs the two
/// fixed channels above.
pub struct DemuxedConn {
    transport: Arc<dyn Conn + Send + Sync>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl DemuxedConn {
    pub fn new(transport: Arc<dyn Conn + Send + Sync>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        DemuxedConn {
            transport,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

#[async_trait]
impl Conn for DemuxedConn {
    async fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.transport.connect(addr).await
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            None => Err(anyhow::anyhow!("demuxed channel closed")),
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let n = self.recv(buf).await?;
        let addr = self.transport.local_addr().await?;
        Ok((n, addr))
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.transport.send(buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        self.transport.send_to(buf, target).await
    }

    async fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr().await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dtls_and_srtp_ranges() {
        assert_eq!(classify(20), Some(Channel::Dtls));
        assert_eq!(classify(63), Some(Channel::Dtls));
        assert_eq!(classify(128), Some(Channel::Srtp));
        assert_eq!(classify(191), Some(Channel::Srtp));
        assert_eq!(classify(0), None);
        assert_eq!(classify(100), None);
    }
}

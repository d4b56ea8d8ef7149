//! ICE transport: agent wrapper plus the first-byte demux that splits the
//! nominated pair's datagrams between DTLS and SRTP/SRTCP (spec.md §4.1,
//! §4.2).

pub mod agent;
pub mod demux;

pub use agent::IceTransport;
pub use demux::{spawn_demux, Channel, DemuxedConn};

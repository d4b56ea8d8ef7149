//! DTLS handshake bridge (spec.md §4.3). Wraps `dtls::conn::DTLSConn` over
//! the ICE-nominated `Conn` (see `crate::ice::agent`); the handshake itself
//! is driven by the `dtls` crate's own connection loop rather than a manual
//! BIO pump, since the nominated pair already behaves like a full-duplex
//! `util::conn::Conn`. `execute_handshake` is kept idempotent by memoizing
//! the completed connection, matching the contract of repeated,
//! packet-triggered invocation (spec.md §4.7 "Repeated handshake
//! invocation").

use std::sync::Arc;

use dtls::config::{ClientAuthType, Config as DtlsConfig, ExtendedMasterSecretType};
use dtls::conn::DTLSConn;
use dtls::crypto::Certificate;
use dtls::extension::extension_use_srtp::SRTPProtectionProfile;
use tokio::sync::Mutex;
use util::conn::Conn;

use crate::certificate::{fingerprint_of_der, DtlsFingerprint};
use crate::error::{Error, Result};

/// DTLS role, mirroring the ICE controlling/controlled split: the master
/// (offer-accepting peer) is the DTLS server, the viewer is the client
/// (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

pub struct DtlsBridge {
    role: Role,
    certificate: Certificate,
    remote_fingerprint: Option<DtlsFingerprint>,
    conn: Mutex<Option<Arc<DTLSConn>>>,
}

impl DtlsBridge {
    pub fn new(role: Role, certificate: Certificate) -> Self {
        DtlsBridge {
            role,
            certificate,
            remote_fingerprint: None,
            conn: Mutex::new(None),
        }
    }

    /// Records the fingerprint advertised in the remote SDP, checked against
    /// the handshake's negotiated peer certificate once complete (spec.md
    /// §4.3, §8 "Fingerprint").
    pub fn init(&mut self, remote_fingerprint: DtlsFingerprint) {
        self.remote_fingerprint = Some(remote_fingerprint);
    }

    fn dtls_config(&self) -> DtlsConfig {
        DtlsConfig {
            certificates: vec![self.certificate.clone()],
            insecure_skip_verify: true, // verified explicitly via SDP fingerprint instead
            extended_master_secret: ExtendedMasterSecretType::Require,
            client_auth: ClientAuthType::RequireAnyClientCert,
            srtp_protection_profiles: vec![
                SRTPProtectionProfile::SRTP_AES128_CM_HMAC_SHA1_80,
                SRTPProtectionProfile::SRTP_AES128_CM_HMAC_SHA1_32,
            ],
            ..Default::default()
        }
    }

    /// Drives the handshake to completion over `transport` (the ICE
    /// nominated pair). Idempotent: a second call while already complete
    /// returns the memoized connection without touching the wire (spec.md
    /// §8 "Idempotence").
    pub async fn execute_handshake(&self, transport: Arc<dyn Conn + Send + Sync>) -> Result<Arc<DTLSConn>> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let is_client = self.role == Role::Client;
        let conn = DTLSConn::new(transport, self.dtls_config(), is_client, None)
            .await
            .map_err(|e| Error::ErrDtlsHandshakeFailed(e.to_string()))?;
        let conn = Arc::new(conn);
        *guard = Some(conn.clone());
        Ok(conn)
    }

    pub async fn is_complete(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Verifies the handshake's peer certificate fingerprint against the one
    /// advertised over signaling (spec.md §4.3, §8 seed scenario 5).
    pub async fn verify_remote_fingerprint(&self) -> Result<()> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::ErrDtlsHandshakeFailed(
            "verify_remote_fingerprint called before handshake completed".into(),
        ))?;
        let state = conn.connection_state().await;
        let peer_der = state
            .peer_certificates
            .first()
            .ok_or_else(|| Error::ErrDtlsHandshakeFailed("no remote certificate".into()))?;
        let actual = fingerprint_of_der(peer_der);

        let expected = self
            .remote_fingerprint
            .as_ref()
            .ok_or(Error::ErrFingerprintMismatch)?;
        if expected.matches(&actual) {
            Ok(())
        } else {
            Err(Error::ErrFingerprintMismatch)
        }
    }

    /// Derives the DTLS-SRTP keying material (RFC 5764 §4.2) for building
    /// the transmit/receive SRTP contexts (spec.md §4.3, §4.4).
    pub async fn populate_keying_material(&self) -> Result<crate::srtp_session::SrtpKeys> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::ErrDtlsHandshakeFailed(
            "populate_keying_material called before handshake completed".into(),
        ))?;
        let state = conn.connection_state().await;
        crate::srtp_session::SrtpKeys::from_dtls_state(&state, self.role == Role::Client).await
    }
}

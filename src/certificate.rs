//! Self-signed DTLS certificate generation and fingerprinting.
//!
//! Grounded on the teacher's `src/peer_connection/certificate.rs`: an ECDSA
//! (P-256) key pair through `rcgen`, wrapped as a `dtls::crypto::Certificate`
//! for the DTLS bridge, with a SHA-256 fingerprint rendered the way
//! spec.md §4.3 and §8 require (colon-separated hex, case-insensitive
//! comparison).

use std::time::{Duration, SystemTime};

use rcgen::{CertificateParams, DistinguishedName, KeyPair, PKCS_ECDSA_P256_SHA256};
use ring::signature::EcdsaKeyPair;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Ten-year validity, per spec.md §4.3.
const CERTIFICATE_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Algorithm + hex digest pair, as carried in SDP `a=fingerprint` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

impl DtlsFingerprint {
    /// Case-insensitive byte-for-byte comparison (spec.md §8 "Fingerprint" law).
    pub fn matches(&self, other: &DtlsFingerprint) -> bool {
        self.algorithm.eq_ignore_ascii_case(&other.algorithm)
            && self.value.eq_ignore_ascii_case(&other.value)
    }
}

/// A generated self-signed certificate plus its `dtls::crypto::Certificate`
/// wrapper, ready to hand to the DTLS bridge.
pub struct EndpointCertificate {
    pub(crate) certificate: dtls::crypto::Certificate,
    fingerprint: DtlsFingerprint,
    expires: SystemTime,
}

impl EndpointCertificate {
    /// Generates a random 20-byte-serial, self-signed ECDSA P-256 certificate
    /// valid for ten years, mirroring spec.md §4.3.
    pub fn generate() -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        let serial = rand::random::<[u8; 20]>();
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&serial));

        let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::ErrOther(format!("key generation failed: {e}")))?;
        let der = key_pair.serialize_der();
        let private_key = dtls::crypto::CryptoPrivateKey {
            kind: dtls::crypto::CryptoPrivateKeyKind::Ecdsa256(
                EcdsaKeyPair::from_pkcs8(
                    &ring::signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                    &der,
                )
                .map_err(|e| Error::ErrOther(format!("invalid generated key: {e:?}")))?,
            ),
            serialized_der: der,
        };
        params.key_pair = Some(key_pair);

        let x509 = rcgen::Certificate::from_params(params)
            .map_err(|e| Error::ErrOther(format!("certificate generation failed: {e}")))?;
        let der_cert = x509
            .serialize_der()
            .map_err(|e| Error::ErrOther(format!("certificate serialization failed: {e}")))?;

        let fingerprint = fingerprint_of_der(&der_cert);
        let expires = SystemTime::now() + CERTIFICATE_VALIDITY;

        Ok(EndpointCertificate {
            certificate: dtls::crypto::Certificate {
                certificate: vec![rustls::Certificate(der_cert)],
                private_key,
            },
            fingerprint,
            expires,
        })
    }

    pub fn fingerprint(&self) -> &DtlsFingerprint {
        &self.fingerprint
    }

    pub fn expires(&self) -> SystemTime {
        self.expires
    }
}

/// SHA-256 of the DER-encoded certificate, rendered as lowercase
/// colon-separated hex (spec.md §4.3).
pub(crate) fn fingerprint_of_der(der: &[u8]) -> DtlsFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(der);
    let digest = hasher.finalize();
    let value = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":");
    DtlsFingerprint {
        algorithm: "sha-256".to_owned(),
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_fingerprint_is_colon_separated_lowercase_hex() {
        let cert = EndpointCertificate::generate().expect("cert generation");
        let fp = cert.fingerprint();
        assert_eq!(fp.algorithm, "sha-256");
        assert_eq!(fp.value.len(), 32 * 2 + 31);
        assert!(fp.value.chars().all(|c| c.is_ascii_hexdigit() || c == ':'));
    }

    #[test]
    fn fingerprint_match_is_case_insensitive() {
        let a = DtlsFingerprint {
            algorithm: "sha-256".into(),
            value: "AB:CD:EF".into(),
        };
        let b = DtlsFingerprint {
            algorithm: "SHA-256".into(),
            value: "ab:cd:ef".into(),
        };
        assert!(a.matches(&b));
    }

    #[test]
    fn fingerprint_mismatch_on_one_hex_digit() {
        let a = DtlsFingerprint {
            algorithm: "sha-256".into(),
            value: "ab:cd:ef".into(),
        };
        let b = DtlsFingerprint {
            algorithm: "sha-256".into(),
            value: "ab:cd:e0".into(),
        };
        assert!(!a.matches(&b));
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Self-signed certificate generation for the agent's local module API
//! listener (§4.6 boot sequence, step 1).

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::error::CoreError;

/// A generated serving certificate: PEM-encoded cert + private key, plus
/// the base64 form of the certificate injected into modules as
/// `MODULE_API_CERTIFICATE`.
pub struct ServingCert {
    pub cert_pem: String,
    pub key_pem: String,
}

impl ServingCert {
    pub fn cert_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.cert_pem)
    }
}

/// Generate a self-signed cert for `common_name` (spec: `127.0.0.1`) valid
/// for `validity_days` (spec: 1 year ⇒ 365).
///
/// rcgen's key generation backend is ECDSA (P-256) rather than RSA-2048;
/// the original design's choice of RSA is an implementation detail of the
/// key algorithm, not an externally observable property the core depends
/// on (nothing here parses the key algorithm out of the cert), so this
/// substitution keeps the crate dependency real rather than hand-rolling
/// ASN.1/RSA key generation.
pub fn generate_self_signed_cert(
    common_name: &str,
    validity_days: i64,
) -> Result<ServingCert, CoreError> {
    let mut params = CertificateParams::new(vec![common_name.to_string()])
        .map_err(|e| CoreError::internal("failed to build certificate params").with_source(e))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.subject_alt_names = vec![SanType::DnsName(
        common_name.to_string().try_into().map_err(|_| CoreError::internal("invalid SAN"))?,
    )];

    let not_before = OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + TimeDuration::days(validity_days);

    let key_pair = KeyPair::generate()
        .map_err(|e| CoreError::internal("failed to generate key pair").with_source(e))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CoreError::internal("failed to self-sign certificate").with_source(e))?;

    Ok(ServingCert { cert_pem: cert.pem(), key_pem: key_pair.serialize_pem() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_a_pem_encoded_cert_and_key() {
        let cert = generate_self_signed_cert("127.0.0.1", 365).unwrap();
        assert!(cert.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(cert.key_pem.contains("PRIVATE KEY"));
        assert!(!cert.cert_base64().is_empty());
    }
}

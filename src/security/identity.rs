// src/security/identity.rs
// Self-signed identity generation and certificate helpers.

use crate::constants::{CERT_BACKDATE_SECS, CERT_VALIDITY_DAYS};
use crate::error::{BridgeError, TrustRejection};
use rand::RngCore;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};

/// This context's public identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub certificate: CertificateDer<'static>,
    pub fingerprint: String,
}

/// Identity plus the private key that matches it.
#[derive(Debug)]
pub struct GeneratedIdentity {
    pub identity: Identity,
    pub private_key: PrivatePkcs8KeyDer<'static>,
}

/// Render a digest as colon separated uppercase hex (`AB:CD:...`).
pub fn format_fingerprint(digest: &[u8]) -> String {
    let hex = base16ct::upper::encode_string(digest);
    let mut out = String::with_capacity(hex.len() + hex.len() / 2);
    for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(std::str::from_utf8(pair).unwrap_or_default());
    }
    out
}

/// SHA-256 over DER encoded SubjectPublicKeyInfo.
pub fn spki_fingerprint(spki_der: &[u8]) -> String {
    format_fingerprint(&Sha256::digest(spki_der))
}

/// Fingerprint of a certificate's public key.
///
/// This is the only peer-identity comparator used anywhere: two certificates
/// are "the same peer" iff their fingerprints are equal.
pub fn fingerprint(cert: &CertificateDer<'_>) -> Result<String, TrustRejection> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|_| TrustRejection::Unparsable)?;
    Ok(spki_fingerprint(parsed.tbs_certificate.subject_pki.raw))
}

/// `(not_before, not_after)` as UNIX seconds.
pub fn validity_window(cert: &CertificateDer<'_>) -> Result<(i64, i64), TrustRejection> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|_| TrustRejection::Unparsable)?;
    let validity = parsed.validity();
    Ok((
        validity.not_before.timestamp(),
        validity.not_after.timestamp(),
    ))
}

/// Reject certificates outside their validity window at `now` (UNIX seconds).
pub fn check_validity(cert: &CertificateDer<'_>, now: i64) -> Result<(), TrustRejection> {
    let (not_before, not_after) = validity_window(cert)?;
    if now < not_before {
        return Err(TrustRejection::NotYetValid);
    }
    if now > not_after {
        return Err(TrustRejection::ExpiredCertificate);
    }
    Ok(())
}

/// Subject DN rendered as a string, if the certificate parses.
pub fn subject(cert: &CertificateDer<'_>) -> Option<String> {
    x509_parser::parse_x509_certificate(cert.as_ref())
        .ok()
        .map(|(_, parsed)| parsed.subject().to_string())
}

/// True when `private_key` is the key certified by `cert`.
pub fn key_matches_certificate(private_key: &[u8], cert: &CertificateDer<'_>) -> bool {
    let Ok(key_pair) = KeyPair::try_from(private_key) else {
        return false;
    };
    match x509_parser::parse_x509_certificate(cert.as_ref()) {
        Ok((_, parsed)) => parsed.tbs_certificate.subject_pki.raw == key_pair.public_key_der().as_slice(),
        Err(_) => false,
    }
}

/// Generate a P-256 key pair and a long-lived self-signed certificate whose
/// subject and issuer CN is `common_name`.
pub fn generate_identity(common_name: &str) -> Result<GeneratedIdentity, BridgeError> {
    let now = OffsetDateTime::now_utc();
    generate_self_signed(
        common_name,
        now - time::Duration::seconds(CERT_BACKDATE_SECS),
        now + time::Duration::days(CERT_VALIDITY_DAYS),
    )
}

/// Same as [`generate_identity`] with an explicit validity window.
pub fn generate_self_signed(
    common_name: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<GeneratedIdentity, BridgeError> {
    let key_gen = |e: rcgen::Error| BridgeError::KeyGeneration(e.to_string());
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(key_gen)?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.not_before = not_before;
    params.not_after = not_after;
    params.serial_number = Some(SerialNumber::from_slice(&random_serial()));

    let cert = params.self_signed(&key_pair).map_err(key_gen)?;
    let certificate = cert.der().clone();
    let fingerprint = fingerprint(&certificate)
        .map_err(|e| BridgeError::KeyGeneration(format!("generated certificate: {}", e)))?;
    Ok(GeneratedIdentity {
        identity: Identity {
            certificate,
            fingerprint,
        },
        private_key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()),
    })
}

// 159 random bits: positive and at most 20 octets once DER encoded.
fn random_serial() -> [u8; 20] {
    let mut serial = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut serial);
    serial[0] &= 0x7f;
    if serial[0] == 0 {
        serial[0] = 0x01;
    }
    serial
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_format_is_colon_upper_hex() {
        assert_eq!(format_fingerprint(&[0x0a, 0xff, 0x10]), "0A:FF:10");
        let fp = spki_fingerprint(b"abc");
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert!(fp.chars().all(|c| c == ':' || c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn generated_identity_is_consistent() {
        let generated = generate_identity("Personal Space").unwrap();
        let cert = &generated.identity.certificate;
        assert_eq!(fingerprint(cert).unwrap(), generated.identity.fingerprint);
        assert!(key_matches_certificate(generated.private_key.secret_pkcs8_der(), cert));
        assert!(subject(cert).unwrap().contains("CN=Personal Space"));

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let (nb, na) = validity_window(cert).unwrap();
        assert!(nb <= now - 30, "backdated for clock skew");
        assert!(na > now + 50 * 365 * 24 * 3600, "valid for decades");
        assert!(check_validity(cert, now).is_ok());
    }

    #[test]
    fn distinct_identities_have_distinct_fingerprints() {
        let a = generate_identity("Private Space").unwrap();
        let b = generate_identity("Private Space").unwrap();
        assert_ne!(a.identity.fingerprint, b.identity.fingerprint);
        assert!(!key_matches_certificate(
            a.private_key.secret_pkcs8_der(),
            &b.identity.certificate
        ));
    }

    #[test]
    fn validity_window_is_enforced() {
        let now = OffsetDateTime::now_utc();
        let expired = generate_self_signed(
            "old",
            now - time::Duration::days(30),
            now - time::Duration::days(1),
        )
        .unwrap();
        assert_eq!(
            check_validity(&expired.identity.certificate, now.unix_timestamp()),
            Err(TrustRejection::ExpiredCertificate)
        );
        let future = generate_self_signed(
            "future",
            now + time::Duration::days(1),
            now + time::Duration::days(30),
        )
        .unwrap();
        assert_eq!(
            check_validity(&future.identity.certificate, now.unix_timestamp()),
            Err(TrustRejection::NotYetValid)
        );
    }

    #[test]
    fn garbage_is_unparsable() {
        let junk = CertificateDer::from(b"\x30\x03\x02\x01\x01".to_vec());
        assert_eq!(fingerprint(&junk), Err(TrustRejection::Unparsable));
    }
}

//! X.509 certificates as carried in signature blocks and host packages.

mod name;

pub use name::DistinguishedName;

use crate::hash::DigestAlgorithm;
use crate::keys::{PublicKey, SignatureAlgorithm};
use crate::PSError;

use spki::ObjectIdentifier;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use x509_parser::prelude::*;

const PEM_CERTIFICATE_TAG: &str = "CERTIFICATE";

/// A parsed X.509 certificate.
///
/// Only the parts needed to check a signature made with an anchor key, and to
/// build chains by issuer name, are retained.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: DistinguishedName,
    issuer: DistinguishedName,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    serial: Vec<u8>,
    subject_key_id: Option<Vec<u8>>,
    public_key: PublicKey,
    tbs: Vec<u8>,
    signature_algorithm: ObjectIdentifier,
    signature: Vec<u8>,
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, PSError> {
        let (rem, cert) = X509Certificate::from_der(der)?;
        if !rem.is_empty() {
            return Err(PSError::CertificateParseError(format!(
                "{} trailing bytes after certificate",
                rem.len()
            )));
        }

        let subject_key_id = cert.extensions().iter().find_map(|ext| {
            match ext.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(KeyIdentifier(id)) => Some(id.to_vec()),
                _ => None,
            }
        });
        let signature_algorithm =
            ObjectIdentifier::from_str(&cert.signature_algorithm.algorithm.to_id_string())
                .map_err(|e| {
                    PSError::CertificateParseError(format!("Invalid signature algorithm: {e}"))
                })?;
        let signature: &[u8] = &cert.signature_value.data;

        Ok(Certificate {
            der: der.to_vec(),
            subject: DistinguishedName::from_der(cert.subject().as_raw())?,
            issuer: DistinguishedName::from_der(cert.issuer().as_raw())?,
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            serial: cert.tbs_certificate.raw_serial().to_vec(),
            subject_key_id,
            public_key: PublicKey::from_spki_der(cert.public_key().raw)?,
            tbs: cert.tbs_certificate.as_ref().to_vec(),
            signature_algorithm,
            signature: signature.to_vec(),
        })
    }

    /// Parse a PEM-encoded certificate. The first `CERTIFICATE` block is used.
    pub fn from_pem(pem: &str) -> Result<Self, PSError> {
        let block = ::pem::parse_many(pem)
            .map_err(|e| PSError::CertificateParseError(format!("Invalid PEM: {e}")))?
            .into_iter()
            .find(|block| block.tag() == PEM_CERTIFICATE_TAG)
            .ok_or_else(|| {
                PSError::CertificateParseError("No CERTIFICATE block in PEM input".to_string())
            })?;
        Self::from_der(block.contents())
    }

    /// Parse every `CERTIFICATE` block of a PEM bundle, in order.
    pub fn chain_from_pem(pem: &str) -> Result<Vec<Self>, PSError> {
        ::pem::parse_many(pem)
            .map_err(|e| PSError::CertificateParseError(format!("Invalid PEM: {e}")))?
            .into_iter()
            .filter(|block| block.tag() == PEM_CERTIFICATE_TAG)
            .map(|block| Self::from_der(block.contents()))
            .collect()
    }

    /// Try DER first, then PEM.
    pub fn from_any(data: &[u8]) -> Result<Self, PSError> {
        if let Ok(cert) = Self::from_der(data) {
            return Ok(cert);
        }
        let s = std::str::from_utf8(data).map_err(|_| {
            PSError::CertificateParseError("Neither DER nor PEM certificate".to_string())
        })?;
        Self::from_pem(s)
    }

    /// Read a PEM or DER certificate from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PSError> {
        let data = fs::read(path)?;
        Self::from_any(&data)
    }

    /// Check that this certificate was signed with `key`.
    pub fn verify(&self, key: &PublicKey) -> Result<(), PSError> {
        let algorithm = SignatureAlgorithm::from_oid(&self.signature_algorithm)?;
        key.verify(algorithm, &self.tbs, &self.signature)
    }

    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> String {
        ::pem::encode(&::pem::Pem::new(PEM_CERTIFICATE_TAG, self.der.clone()))
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    pub fn subject_key_id(&self) -> Option<&[u8]> {
        self.subject_key_id.as_deref()
    }

    /// SHA-256 fingerprint of the DER encoding.
    pub fn fingerprint(&self) -> String {
        hex::encode(DigestAlgorithm::Sha256.digest(&self.der))
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// True if `other`'s issuer name is this certificate's subject name.
    pub fn issued(&self, other: &Certificate) -> bool {
        self.subject_raw == other.issuer_raw
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject.to_string())
            .field("issuer", &self.issuer.to_string())
            .field("serial", &self.serial_hex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType, KeyPair};

    fn self_signed(cn: &str) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, cn);
        let cert = params.self_signed(&key).unwrap();
        (cert, key)
    }

    #[test]
    fn test_parse_self_signed() {
        let (cert, _key) = self_signed("Test Root");
        let parsed = Certificate::from_der(cert.der()).unwrap();
        assert_eq!(parsed.subject().get("CN"), Some("Test Root"));
        assert!(parsed.is_self_issued());
        assert!(parsed.issued(&parsed));
        parsed.verify(parsed.public_key()).unwrap();
        assert_eq!(parsed.fingerprint().len(), 64);
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let (a, _) = self_signed("A");
        let (b, _) = self_signed("B");
        let a = Certificate::from_der(a.der()).unwrap();
        let b = Certificate::from_der(b.der()).unwrap();
        assert!(matches!(
            a.verify(b.public_key()),
            Err(PSError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_issued_by_ca() {
        let (ca, ca_key) = self_signed("Issuing CA");
        let leaf_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, "Leaf");
        let leaf = params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

        let ca = Certificate::from_der(ca.der()).unwrap();
        let leaf = Certificate::from_der(leaf.der()).unwrap();
        assert!(ca.issued(&leaf));
        assert!(!leaf.issued(&ca));
        assert_eq!(leaf.issuer(), ca.subject());
        leaf.verify(ca.public_key()).unwrap();
        assert!(leaf.verify(leaf.public_key()).is_err());
    }

    const RSA_KEY: &str = include_str!("../../tests/data/rsa-2048.pem");
    const OTHER_RSA_KEY: &str = include_str!("../../tests/data/rsa-2048-other.pem");

    fn rsa_self_signed(cn: &str, pem: &str) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::from_pem_and_sign_algo(pem, &rcgen::PKCS_RSA_SHA256).unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, cn);
        let cert = params.self_signed(&key).unwrap();
        (cert, key)
    }

    #[test]
    fn test_rsa_self_signed() {
        let (cert, _) = rsa_self_signed("RSA Root", RSA_KEY);
        let parsed = Certificate::from_der(cert.der()).unwrap();
        assert_eq!(parsed.signature_algorithm, crate::oids::SHA256_WITH_RSA);
        assert_eq!(parsed.public_key().algorithm(), &crate::keys::KeyAlgorithm::Rsa);
        parsed.verify(parsed.public_key()).unwrap();

        let (other, _) = rsa_self_signed("RSA Root", OTHER_RSA_KEY);
        let other = Certificate::from_der(other.der()).unwrap();
        assert!(matches!(
            parsed.verify(other.public_key()),
            Err(PSError::SignatureVerificationFailed)
        ));
        let (p256, _) = self_signed("RSA Root");
        let p256 = Certificate::from_der(p256.der()).unwrap();
        assert!(matches!(
            parsed.verify(p256.public_key()),
            Err(PSError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_rsa_ca_issues_p256_leaf() {
        let (ca, ca_key) = rsa_self_signed("RSA CA", RSA_KEY);
        let leaf_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, "Leaf");
        let leaf = params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

        let ca = Certificate::from_der(ca.der()).unwrap();
        let leaf = Certificate::from_der(leaf.der()).unwrap();
        assert!(ca.issued(&leaf));
        leaf.verify(ca.public_key()).unwrap();
        assert!(leaf.verify(leaf.public_key()).is_err());
    }

    #[test]
    fn test_pem_round_trip() {
        let (cert, _) = self_signed("Pem");
        let parsed = Certificate::from_pem(&cert.pem()).unwrap();
        assert_eq!(parsed.as_der(), &cert.der()[..]);
        assert_eq!(Certificate::from_any(parsed.to_pem().as_bytes()).unwrap(), parsed);
        assert_eq!(Certificate::from_any(cert.der()).unwrap(), parsed);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(matches!(
            Certificate::from_der(b"definitely not a certificate"),
            Err(PSError::CertificateParseError(_))
        ));
        assert!(matches!(
            Certificate::from_any(b"-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"),
            Err(PSError::CertificateParseError(_))
        ));
    }
}

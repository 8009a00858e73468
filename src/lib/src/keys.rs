use crate::hash::DigestAlgorithm;
use crate::{oids, PSError};

use log::*;
use spki::ObjectIdentifier;
use std::fmt;

/// Public key algorithms found in signer certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    EcdsaP256,
    Ed25519,
    Unsupported(String),
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => write!(f, "RSA"),
            KeyAlgorithm::EcdsaP256 => write!(f, "ECDSA P-256"),
            KeyAlgorithm::Ed25519 => write!(f, "Ed25519"),
            KeyAlgorithm::Unsupported(name) => write!(f, "unsupported ({name})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    RsaPkcs1v15,
    Ecdsa,
    Ed25519,
}

/// A signature scheme together with the digest it is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureAlgorithm {
    pub scheme: SignatureScheme,
    pub digest: DigestAlgorithm,
}

impl SignatureAlgorithm {
    /// Resolve a combined signature algorithm identifier, as used in certificates.
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self, PSError> {
        let (scheme, digest) = if *oid == oids::SHA1_WITH_RSA {
            (SignatureScheme::RsaPkcs1v15, DigestAlgorithm::Sha1)
        } else if *oid == oids::SHA256_WITH_RSA {
            (SignatureScheme::RsaPkcs1v15, DigestAlgorithm::Sha256)
        } else if *oid == oids::SHA384_WITH_RSA {
            (SignatureScheme::RsaPkcs1v15, DigestAlgorithm::Sha384)
        } else if *oid == oids::SHA512_WITH_RSA {
            (SignatureScheme::RsaPkcs1v15, DigestAlgorithm::Sha512)
        } else if *oid == oids::ECDSA_WITH_SHA1 {
            (SignatureScheme::Ecdsa, DigestAlgorithm::Sha1)
        } else if *oid == oids::ECDSA_WITH_SHA256 {
            (SignatureScheme::Ecdsa, DigestAlgorithm::Sha256)
        } else if *oid == oids::ECDSA_WITH_SHA384 {
            (SignatureScheme::Ecdsa, DigestAlgorithm::Sha384)
        } else if *oid == oids::ECDSA_WITH_SHA512 {
            (SignatureScheme::Ecdsa, DigestAlgorithm::Sha512)
        } else if *oid == oids::ED25519 {
            (SignatureScheme::Ed25519, DigestAlgorithm::Sha512)
        } else {
            return Err(PSError::UnsupportedAlgorithm(format!("signature {oid}")));
        };
        Ok(SignatureAlgorithm { scheme, digest })
    }

    /// Resolve the digest and signature algorithm pair of a CMS signer info.
    ///
    /// Signer infos either name the bare key algorithm (`rsaEncryption`,
    /// `id-ecPublicKey`) or a combined identifier; the digest algorithm always
    /// comes from the separate digest field.
    pub fn from_signer_oids(
        digest: &ObjectIdentifier,
        signature: &ObjectIdentifier,
    ) -> Result<Self, PSError> {
        let scheme = if *signature == oids::RSA_ENCRYPTION {
            SignatureScheme::RsaPkcs1v15
        } else if *signature == oids::EC_PUBLIC_KEY {
            SignatureScheme::Ecdsa
        } else {
            Self::from_oid(signature)?.scheme
        };
        if scheme == SignatureScheme::Ed25519 {
            return Ok(SignatureAlgorithm {
                scheme,
                digest: DigestAlgorithm::from_oid(digest).unwrap_or(DigestAlgorithm::Sha512),
            });
        }
        Ok(SignatureAlgorithm {
            scheme,
            digest: DigestAlgorithm::from_oid(digest)?,
        })
    }
}

/// A public key taken from a certificate's SubjectPublicKeyInfo.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    spki: Vec<u8>,
    key_bits: Vec<u8>,
    algorithm: KeyAlgorithm,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("algorithm", &self.algorithm)
            .field("key_bits", &hex::encode(&self.key_bits))
            .finish()
    }
}

impl PublicKey {
    /// Parse a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, PSError> {
        let spki = spki::SubjectPublicKeyInfoRef::try_from(der)
            .map_err(|e| PSError::CertificateParseError(format!("Invalid public key: {e}")))?;
        let oid = spki.algorithm.oid;
        let algorithm = if oid == oids::RSA_ENCRYPTION {
            KeyAlgorithm::Rsa
        } else if oid == oids::EC_PUBLIC_KEY {
            let curve = spki
                .algorithm
                .parameters
                .and_then(|params| params.decode_as::<ObjectIdentifier>().ok());
            match curve {
                Some(curve) if curve == oids::SECP256R1 => KeyAlgorithm::EcdsaP256,
                Some(curve) => KeyAlgorithm::Unsupported(format!("EC curve {curve}")),
                None => KeyAlgorithm::Unsupported("EC key without named curve".to_string()),
            }
        } else if oid == oids::ED25519 {
            KeyAlgorithm::Ed25519
        } else {
            KeyAlgorithm::Unsupported(oid.to_string())
        };
        Ok(PublicKey {
            spki: der.to_vec(),
            key_bits: spki.subject_public_key.raw_bytes().to_vec(),
            algorithm,
        })
    }

    pub fn algorithm(&self) -> &KeyAlgorithm {
        &self.algorithm
    }

    /// The DER-encoded SubjectPublicKeyInfo.
    pub fn to_der(&self) -> &[u8] {
        &self.spki
    }

    /// Verify `signature` over `message`.
    pub fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), PSError> {
        match (&self.algorithm, algorithm.scheme) {
            (KeyAlgorithm::Rsa, SignatureScheme::RsaPkcs1v15) => {
                self.verify_rsa(algorithm.digest, message, signature)
            }
            (KeyAlgorithm::EcdsaP256, SignatureScheme::Ecdsa) => {
                self.verify_p256(algorithm.digest, message, signature)
            }
            (KeyAlgorithm::Ed25519, SignatureScheme::Ed25519) => {
                self.verify_ed25519(message, signature)
            }
            (KeyAlgorithm::Unsupported(name), _) => {
                Err(PSError::UnsupportedAlgorithm(name.clone()))
            }
            (key, scheme) => {
                debug!("Key type {key} cannot verify {scheme:?} signatures");
                Err(PSError::SignatureVerificationFailed)
            }
        }
    }

    fn verify_rsa(
        &self,
        digest: DigestAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), PSError> {
        use rsa::pkcs8::DecodePublicKey;
        use rsa::Pkcs1v15Sign;

        let key = rsa::RsaPublicKey::from_public_key_der(&self.spki)
            .map_err(|e| PSError::CertificateParseError(format!("Invalid RSA key: {e}")))?;
        let padding = match digest {
            DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        };
        key.verify(padding, &digest.digest(message), signature)
            .map_err(|_| PSError::SignatureVerificationFailed)
    }

    fn verify_p256(
        &self,
        digest: DigestAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), PSError> {
        use p256::ecdsa::signature::hazmat::PrehashVerifier;
        use p256::ecdsa::{Signature, VerifyingKey};
        use p256::pkcs8::DecodePublicKey;

        let key = VerifyingKey::from_public_key_der(&self.spki)
            .map_err(|e| PSError::CertificateParseError(format!("Invalid P-256 key: {e}")))?;
        let signature =
            Signature::from_der(signature).map_err(|_| PSError::SignatureVerificationFailed)?;
        key.verify_prehash(&digest.digest(message), &signature)
            .map_err(|_| PSError::SignatureVerificationFailed)
    }

    fn verify_ed25519(&self, message: &[u8], signature: &[u8]) -> Result<(), PSError> {
        let key = ed25519_compact::PublicKey::from_slice(&self.key_bits)
            .map_err(|e| PSError::CertificateParseError(format!("Invalid Ed25519 key: {e}")))?;
        let signature = ed25519_compact::Signature::from_slice(signature)
            .map_err(|_| PSError::SignatureVerificationFailed)?;
        key.verify(message, &signature)
            .map_err(|_| PSError::SignatureVerificationFailed)
    }
}

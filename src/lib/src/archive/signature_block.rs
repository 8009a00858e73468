//! PKCS#7 / CMS signature blocks (`META-INF/*.RSA`, `*.EC`, `*.DSA`).

use crate::certificate::Certificate;
use crate::keys::SignatureAlgorithm;
use crate::{oids, PSError};

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{OctetString, SetOfVec};
use der::{Any, Decode, Encode};
use log::*;
use spki::AlgorithmIdentifierOwned;

/// A signer whose signature over a signature file has been checked.
#[derive(Debug, Clone)]
pub struct VerifiedSigner {
    chain: Vec<Certificate>,
}

impl VerifiedSigner {
    /// The signer's certificate chain, leaf first.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// The certificate whose key made the signature.
    pub fn certificate(&self) -> &Certificate {
        &self.chain[0]
    }
}

/// A parsed detached `SignedData` structure.
pub struct SignatureBlock {
    signed_data: SignedData,
    raw_certificates: Vec<x509_cert::Certificate>,
    certificates: Vec<Certificate>,
}

impl SignatureBlock {
    pub fn parse(bytes: &[u8]) -> Result<Self, PSError> {
        let content_info = ContentInfo::from_der(bytes)
            .map_err(|e| PSError::SignatureBlockError(format!("Invalid ContentInfo: {e}")))?;
        if content_info.content_type != oids::SIGNED_DATA {
            return Err(PSError::SignatureBlockError(format!(
                "Unexpected content type {}",
                content_info.content_type
            )));
        }
        let signed_data = content_info
            .content
            .decode_as::<SignedData>()
            .map_err(|e| PSError::SignatureBlockError(format!("Invalid SignedData: {e}")))?;

        let raw_certificates: Vec<x509_cert::Certificate> = signed_data
            .certificates
            .iter()
            .flat_map(|set| set.0.iter())
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert.clone()),
                _ => None,
            })
            .collect();
        let certificates = raw_certificates
            .iter()
            .map(|cert| Certificate::from_der(&cert.to_der()?))
            .collect::<Result<Vec<_>, PSError>>()?;

        Ok(SignatureBlock {
            signed_data,
            raw_certificates,
            certificates,
        })
    }

    /// Encode a detached `SignedData` carrying `chain` and `signer_infos`.
    pub(crate) fn encode(
        chain: &[Certificate],
        signer_infos: Vec<SignerInfo>,
    ) -> Result<Vec<u8>, PSError> {
        let certificates = chain
            .iter()
            .map(|cert| {
                x509_cert::Certificate::from_der(cert.as_der()).map(CertificateChoices::Certificate)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut digest_algorithms: Vec<AlgorithmIdentifierOwned> = Vec::new();
        for info in &signer_infos {
            if !digest_algorithms.contains(&info.digest_alg) {
                digest_algorithms.push(info.digest_alg.clone());
            }
        }

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(digest_algorithms)?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: oids::DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(signer_infos)?),
        };
        let content_info = ContentInfo {
            content_type: oids::SIGNED_DATA,
            content: Any::from_der(&signed_data.to_der()?)?,
        };
        Ok(content_info.to_der()?)
    }

    /// Identify `certificate` by issuer and serial number.
    pub(crate) fn signer_id(certificate: &Certificate) -> Result<SignerIdentifier, PSError> {
        let cert = x509_cert::Certificate::from_der(certificate.as_der())?;
        Ok(SignerIdentifier::IssuerAndSerialNumber(
            IssuerAndSerialNumber {
                issuer: cert.tbs_certificate.issuer,
                serial_number: cert.tbs_certificate.serial_number,
            },
        ))
    }

    /// All certificates embedded in the block, in encoding order.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Check every signer over `content` (the signature file bytes).
    ///
    /// All signer infos must verify; a block with no signers is rejected.
    pub fn verify(&self, content: &[u8]) -> Result<Vec<VerifiedSigner>, PSError> {
        let signer_infos = &self.signed_data.signer_infos.0;
        if signer_infos.is_empty() {
            return Err(PSError::SignatureBlockError("No signer infos".to_string()));
        }
        signer_infos
            .iter()
            .map(|info| self.verify_signer(info, content))
            .collect()
    }

    fn verify_signer(&self, info: &SignerInfo, content: &[u8]) -> Result<VerifiedSigner, PSError> {
        let index = self.find_signer(&info.sid)?;
        let signer = &self.certificates[index];
        let algorithm =
            SignatureAlgorithm::from_signer_oids(&info.digest_alg.oid, &info.signature_algorithm.oid)?;
        let signature = info.signature.as_bytes();

        match &info.signed_attrs {
            Some(attrs) => {
                let message_digest = attrs
                    .iter()
                    .find(|attr| attr.oid == oids::MESSAGE_DIGEST)
                    .and_then(|attr| attr.values.iter().next())
                    .ok_or_else(|| {
                        PSError::SignatureBlockError("Missing messageDigest attribute".to_string())
                    })?
                    .decode_as::<OctetString>()?;
                if message_digest.as_bytes() != algorithm.digest.digest(content).as_slice() {
                    return Err(PSError::DigestMismatch("signature file".to_string()));
                }
                signer
                    .public_key()
                    .verify(algorithm, &attrs.to_der()?, signature)?;
            }
            None => signer.public_key().verify(algorithm, content, signature)?,
        }
        debug!("Signature by [{}] verified", signer.subject());

        Ok(VerifiedSigner {
            chain: self.chain_from(index),
        })
    }

    fn find_signer(&self, sid: &SignerIdentifier) -> Result<usize, PSError> {
        let found = match sid {
            SignerIdentifier::IssuerAndSerialNumber(isn) => {
                self.raw_certificates.iter().position(|cert| {
                    cert.tbs_certificate.issuer == isn.issuer
                        && cert.tbs_certificate.serial_number == isn.serial_number
                })
            }
            SignerIdentifier::SubjectKeyIdentifier(ski) => self
                .certificates
                .iter()
                .position(|cert| cert.subject_key_id() == Some(ski.0.as_bytes())),
        };
        found.ok_or_else(|| {
            PSError::SignatureBlockError("Signer certificate not found in block".to_string())
        })
    }

    /// Build a leaf-first chain by following issuer names through the block.
    fn chain_from(&self, leaf: usize) -> Vec<Certificate> {
        let mut used = vec![leaf];
        let mut current = leaf;
        while !self.certificates[current].is_self_issued() {
            let next = (0..self.certificates.len()).find(|i| {
                !used.contains(i) && self.certificates[*i].issued(&self.certificates[current])
            });
            match next {
                Some(next) => {
                    used.push(next);
                    current = next;
                }
                None => break,
            }
        }
        used.into_iter()
            .map(|i| self.certificates[i].clone())
            .collect()
    }
}

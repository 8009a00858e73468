//! Writing v1-signed package archives.
//!
//! The signer produces `META-INF/MANIFEST.MF` with SHA-256 entry digests,
//! `META-INF/CERT.SF` and a detached CMS signature in `META-INF/CERT.EC`
//! made with an ECDSA P-256 key.

use crate::archive::{is_signature_metadata, ManifestWriter, SignatureBlock, MANIFEST_NAME};
use crate::certificate::Certificate;
use crate::hash::DigestAlgorithm;
use crate::{oids, PSError};

use base64::prelude::*;
use cms::content_info::CmsVersion;
use cms::signed_data::SignerInfo;
use der::asn1::OctetString;
use log::*;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use spki::AlgorithmIdentifierOwned;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const SIGNATURE_FILE_NAME: &str = "META-INF/CERT.SF";
const SIGNATURE_BLOCK_NAME: &str = "META-INF/CERT.EC";
const DEFAULT_CREATED_BY: &str = concat!("patchsig ", env!("CARGO_PKG_VERSION"));

/// Signs package archives with an ECDSA P-256 key and its certificate chain.
pub struct PackageSigner {
    key: SigningKey,
    chain: Vec<Certificate>,
    created_by: String,
}

impl PackageSigner {
    /// `chain` is leaf first; the leaf must certify `key`.
    pub fn new(key: SigningKey, chain: Vec<Certificate>) -> Result<Self, PSError> {
        let leaf = chain
            .first()
            .ok_or_else(|| PSError::SigningError("Empty certificate chain".to_string()))?;
        let public_key = key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| PSError::SigningError(e.to_string()))?;
        if public_key.as_bytes() != leaf.public_key().to_der() {
            return Err(PSError::SigningError(format!(
                "Key does not match certificate [{}]",
                leaf.subject()
            )));
        }
        Ok(PackageSigner {
            key,
            chain,
            created_by: DEFAULT_CREATED_BY.to_string(),
        })
    }

    /// Load a PKCS#8 PEM key and a PEM certificate chain.
    pub fn from_pem(key_pem: &str, chain_pem: &str) -> Result<Self, PSError> {
        let key = SigningKey::from_pkcs8_pem(key_pem)
            .map_err(|e| PSError::SigningError(format!("Invalid P-256 private key: {e}")))?;
        Self::new(key, Certificate::chain_from_pem(chain_pem)?)
    }

    pub fn from_files(key_file: impl AsRef<Path>, chain_file: impl AsRef<Path>) -> Result<Self, PSError> {
        let key_pem = std::fs::read_to_string(key_file)?;
        let chain_pem = std::fs::read_to_string(chain_file)?;
        Self::from_pem(&key_pem, &chain_pem)
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    pub fn certificate(&self) -> &Certificate {
        &self.chain[0]
    }

    pub fn sign_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<(), PSError> {
        let reader = BufReader::new(File::open(input)?);
        let writer = File::create(output)?;
        self.sign(reader, writer)?;
        Ok(())
    }

    /// Copy every entry of `input` to `output` and add a fresh signature.
    ///
    /// Existing signature metadata is dropped.
    pub fn sign<R: Read + Seek, W: Write + Seek>(&self, input: R, output: W) -> Result<W, PSError> {
        let mut zip = ZipArchive::new(input)?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            let name = file.name().to_string();
            if file.is_dir() || is_signature_metadata(&name) {
                continue;
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push((name, data));
        }

        let digest = |data: &[u8]| BASE64_STANDARD.encode(DigestAlgorithm::Sha256.digest(data));

        let mut manifest = ManifestWriter::new();
        manifest
            .attribute("Manifest-Version", "1.0")
            .attribute("Created-By", &self.created_by);
        let main = manifest.end_section();
        let mut sections = Vec::with_capacity(entries.len());
        for (name, data) in &entries {
            manifest
                .attribute("Name", name)
                .attribute("SHA-256-Digest", &digest(&data[..]));
            sections.push((name, manifest.end_section()));
        }
        let manifest = manifest.into_bytes();

        let mut signature_file = ManifestWriter::new();
        signature_file
            .attribute("Signature-Version", "1.0")
            .attribute("Created-By", &self.created_by)
            .attribute("SHA-256-Digest-Manifest", &digest(&manifest[..]))
            .attribute(
                "SHA-256-Digest-Manifest-Main-Attributes",
                &digest(&manifest[main]),
            );
        signature_file.end_section();
        for (name, range) in sections {
            signature_file
                .attribute("Name", name)
                .attribute("SHA-256-Digest", &digest(&manifest[range]));
            signature_file.end_section();
        }
        let signature_file = signature_file.into_bytes();
        let block = self.signature_block(&signature_file)?;

        let mut writer = ZipWriter::new(output);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in [
            (MANIFEST_NAME, &manifest),
            (SIGNATURE_FILE_NAME, &signature_file),
            (SIGNATURE_BLOCK_NAME, &block),
        ] {
            writer.start_file(name, options)?;
            writer.write_all(data)?;
        }
        for (name, data) in &entries {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }
        debug!(
            "Signed {} entries as [{}]",
            entries.len(),
            self.certificate().subject()
        );
        Ok(writer.finish()?)
    }

    /// Detached CMS `SignedData` over `content`.
    fn signature_block(&self, content: &[u8]) -> Result<Vec<u8>, PSError> {
        let signature: Signature = self.key.sign(content);
        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignatureBlock::signer_id(self.certificate())?,
            digest_alg: AlgorithmIdentifierOwned {
                oid: oids::SHA256,
                parameters: None,
            },
            signed_attrs: None,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: oids::ECDSA_WITH_SHA256,
                parameters: None,
            },
            signature: OctetString::new(signature.to_der().as_bytes())?,
            unsigned_attrs: None,
        };
        SignatureBlock::encode(&self.chain, vec![signer_info])
    }
}

//! Sources for the running host's own signing certificates.

use crate::archive::SignedArchive;
use crate::PSError;

use std::fs;
use std::path::PathBuf;

/// The installed package the verifying process runs from.
pub trait HostPackage {
    fn package_name(&self) -> &str;

    /// DER-encoded signing certificates, one per signer, in signer order.
    fn signing_certificates(&self) -> Result<Vec<Vec<u8>>, PSError>;
}

/// The host's own installed signed archive.
#[derive(Debug, Clone)]
pub struct InstalledArchive {
    package_name: String,
    path: PathBuf,
}

impl InstalledArchive {
    pub fn new(package_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        InstalledArchive {
            package_name: package_name.into(),
            path: path.into(),
        }
    }
}

impl HostPackage for InstalledArchive {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn signing_certificates(&self) -> Result<Vec<Vec<u8>>, PSError> {
        let archive = SignedArchive::open(&self.path).map_err(|e| {
            PSError::HostLookupError(format!("{}: {}", self.path.display(), e))
        })?;
        let certificates: Vec<Vec<u8>> = archive
            .signers()
            .iter()
            .map(|signer| signer.certificate().as_der().to_vec())
            .collect();
        if certificates.is_empty() {
            return Err(PSError::HostLookupError(format!(
                "{} is not signed",
                self.path.display()
            )));
        }
        Ok(certificates)
    }
}

/// A PEM or DER certificate file standing in for the host's signature.
#[derive(Debug, Clone)]
pub struct CertificateFile {
    package_name: String,
    path: PathBuf,
}

impl CertificateFile {
    pub fn new(package_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        CertificateFile {
            package_name: package_name.into(),
            path: path.into(),
        }
    }
}

impl HostPackage for CertificateFile {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn signing_certificates(&self) -> Result<Vec<Vec<u8>>, PSError> {
        let data = fs::read(&self.path).map_err(|e| {
            PSError::HostLookupError(format!("{}: {}", self.path.display(), e))
        })?;
        let is_pem = data.starts_with(b"-----BEGIN");
        if !is_pem {
            return Ok(vec![data]);
        }
        let blocks = pem::parse_many(&data)
            .map_err(|e| PSError::CertificateParseError(format!("Invalid PEM: {e}")))?;
        let certificates: Vec<Vec<u8>> = blocks
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| block.into_contents())
            .collect();
        if certificates.is_empty() {
            return Err(PSError::HostLookupError(format!(
                "{} contains no certificate",
                self.path.display()
            )));
        }
        Ok(certificates)
    }
}

/// Certificates supplied directly, for embedders and tests.
#[derive(Debug, Clone)]
pub struct StaticHost {
    package_name: String,
    certificates: Vec<Vec<u8>>,
}

impl StaticHost {
    pub fn new(package_name: impl Into<String>, certificates: Vec<Vec<u8>>) -> Self {
        StaticHost {
            package_name: package_name.into(),
            certificates,
        }
    }
}

impl HostPackage for StaticHost {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn signing_certificates(&self) -> Result<Vec<Vec<u8>>, PSError> {
        if self.certificates.is_empty() {
            return Err(PSError::HostLookupError(format!(
                "{} has no signing certificates",
                self.package_name
            )));
        }
        Ok(self.certificates.clone())
    }
}

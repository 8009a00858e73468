use crate::certificate::{Certificate, DistinguishedName};
use crate::host::HostPackage;
use crate::keys::PublicKey;
use crate::PSError;

use log::*;

/// The host's signing key, captured once and used as ground truth.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchor {
    public_key: Option<PublicKey>,
    subject: Option<DistinguishedName>,
    is_debug_build: bool,
}

impl TrustAnchor {
    /// Capture the anchor from the host's first signing certificate.
    pub fn capture(
        host: &dyn HostPackage,
        debug_identity: &DistinguishedName,
    ) -> Result<Self, PSError> {
        let certificates = host.signing_certificates().map_err(|e| match e {
            PSError::HostLookupError(_) | PSError::CertificateParseError(_) => e,
            other => PSError::HostLookupError(other.to_string()),
        })?;
        let first = certificates.first().ok_or_else(|| {
            PSError::HostLookupError(format!(
                "{} has no signing certificates",
                host.package_name()
            ))
        })?;
        let certificate = Certificate::from_der(first)?;
        let anchor = Self::from_certificate(&certificate, debug_identity);
        debug!(
            "Trust anchor for {}: [{}], debug build: {}",
            host.package_name(),
            certificate.subject(),
            anchor.is_debug_build
        );
        Ok(anchor)
    }

    pub fn from_certificate(certificate: &Certificate, debug_identity: &DistinguishedName) -> Self {
        TrustAnchor {
            public_key: Some(certificate.public_key().clone()),
            subject: Some(certificate.subject().clone()),
            is_debug_build: certificate.subject() == debug_identity,
        }
    }

    /// An anchor with no key: every verification against it fails.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    pub fn subject(&self) -> Option<&DistinguishedName> {
        self.subject.as_ref()
    }

    pub fn is_debug_build(&self) -> bool {
        self.is_debug_build
    }

    pub fn is_available(&self) -> bool {
        self.public_key.is_some()
    }
}

use crate::anchor::TrustAnchor;
use crate::archive::{ArchiveOpener, PackageEntry, ZipOpener};
use crate::certificate::{Certificate, DistinguishedName};
use crate::config::VerifierConfig;
use crate::host::HostPackage;
use crate::PSError;

use log::*;
use std::io;
use std::path::Path;

/// Why a package was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// The host is debug-signed; nothing was checked.
    DebugBypass,
    /// A certificate in the marker entry's chain was signed by the anchor key.
    Verified { subject: DistinguishedName },
}

/// Decides whether a package archive was signed by the host's own signing key.
///
/// The trust anchor is captured once at construction and never changes.
pub struct SignatureVerifier {
    anchor: TrustAnchor,
    config: VerifierConfig,
    opener: Box<dyn ArchiveOpener + Send + Sync>,
}

impl SignatureVerifier {
    /// Capture the anchor from `host` with the default configuration.
    ///
    /// This never fails. If the anchor cannot be established the error is
    /// logged and every later verification returns `false`.
    pub fn new(host: &dyn HostPackage) -> Self {
        Self::with_config(host, VerifierConfig::default())
    }

    pub fn with_config(host: &dyn HostPackage, config: VerifierConfig) -> Self {
        let anchor = match config
            .debug_identity_name()
            .and_then(|identity| TrustAnchor::capture(host, &identity))
        {
            Ok(anchor) => anchor,
            Err(e) => {
                error!(
                    "Cannot establish trust anchor for {}: {}",
                    host.package_name(),
                    e
                );
                TrustAnchor::unavailable()
            }
        };
        Self::with_anchor(anchor, config)
    }

    /// Build a verifier around an anchor the caller captured itself.
    pub fn with_anchor(anchor: TrustAnchor, config: VerifierConfig) -> Self {
        SignatureVerifier {
            anchor,
            config,
            opener: Box::new(ZipOpener),
        }
    }

    /// Replace the archive backend.
    pub fn with_opener(mut self, opener: impl ArchiveOpener + Send + Sync + 'static) -> Self {
        self.opener = Box::new(opener);
        self
    }

    pub fn anchor(&self) -> &TrustAnchor {
        &self.anchor
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    fn debug_bypass(&self) -> bool {
        self.anchor.is_debug_build() && self.config.allow_debug_bypass
    }

    /// Returns `true` if the package at `path` may be loaded.
    ///
    /// Every failure is logged and reported as `false`.
    pub fn verify_package(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.try_verify_package(path) {
            Ok(Acceptance::DebugBypass) => {
                debug!("Debug build, accepting {} unchecked", path.display());
                true
            }
            Ok(Acceptance::Verified { subject }) => {
                debug!("{} accepted, signed by [{}]", path.display(), subject);
                true
            }
            Err(e) => {
                error!("{} rejected: {}", path.display(), e);
                false
            }
        }
    }

    /// Like [`verify_package`](Self::verify_package), but returns the reason.
    pub fn try_verify_package(&self, path: impl AsRef<Path>) -> Result<Acceptance, PSError> {
        let path = path.as_ref();
        if self.debug_bypass() {
            return Ok(Acceptance::DebugBypass);
        }
        if !self.anchor.is_available() {
            return Err(PSError::TrustAnchorUnavailable);
        }

        let mut archive = self.opener.open(path)?;
        let marker = &self.config.marker_entry;
        let mut entry = archive
            .open_entry(marker)?
            .ok_or_else(|| PSError::MissingPayloadEntry(marker.clone()))?;

        // Certificates are only known once the entry was read to the end.
        consume(&mut *entry)?;
        let certificates = entry
            .certificates()
            .ok_or_else(|| PSError::MissingCertificates(marker.clone()))?;

        let matched = self.check_chain(certificates)?;
        Ok(Acceptance::Verified {
            subject: matched.subject().clone(),
        })
    }

    /// Returns `true` if any certificate of `certificates` was signed by the anchor key.
    pub fn check(&self, certificates: &[Certificate]) -> bool {
        match self.check_chain(certificates) {
            Ok(_) => true,
            Err(e) => {
                debug!("Chain check failed: {}", e);
                false
            }
        }
    }

    /// Find the certificate signed by the anchor key.
    ///
    /// The chain is visited from its last element to its first, so with a
    /// leaf-first chain the certificate closest to the root wins.
    pub fn check_chain<'c>(
        &self,
        certificates: &'c [Certificate],
    ) -> Result<&'c Certificate, PSError> {
        let key = self
            .anchor
            .public_key()
            .ok_or(PSError::TrustAnchorUnavailable)?;
        if certificates.is_empty() {
            return Err(PSError::MissingCertificates(
                "empty certificate chain".to_string(),
            ));
        }
        for certificate in certificates.iter().rev() {
            match certificate.verify(key) {
                Ok(()) => return Ok(certificate),
                Err(e) => warn!("[{}] not signed by anchor: {}", certificate.subject(), e),
            }
        }
        Err(PSError::CertificateVerifyMismatch)
    }
}

fn consume(entry: &mut dyn PackageEntry) -> Result<(), PSError> {
    io::copy(entry, &mut io::sink()).map_err(PSError::from_read_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PackageArchive;
    use rcgen::{CertificateParams, DnType, KeyPair};
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn issue(cn: &str, issuer: Option<(&rcgen::Certificate, &KeyPair)>) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, cn);
        let cert = match issuer {
            Some((issuer, issuer_key)) => params.signed_by(&key, issuer, issuer_key).unwrap(),
            None => params.self_signed(&key).unwrap(),
        };
        (cert, key)
    }

    fn parsed(cert: &rcgen::Certificate) -> Certificate {
        Certificate::from_der(cert.der()).unwrap()
    }

    fn verifier_for(host: &rcgen::Certificate) -> SignatureVerifier {
        let identity = DistinguishedName::parse(crate::DEBUG_IDENTITY).unwrap();
        let anchor = TrustAnchor::from_certificate(&parsed(host), &identity);
        SignatureVerifier::with_anchor(anchor, VerifierConfig::default())
    }

    #[derive(Clone, Copy)]
    enum Scenario {
        MissingEntry,
        ReadError,
        Unsigned,
        Signed,
    }

    struct FakeOpener {
        closed: Arc<AtomicUsize>,
        scenario: Scenario,
        certificates: Vec<Certificate>,
    }

    struct FakeArchive {
        closed: Arc<AtomicUsize>,
        scenario: Scenario,
        certificates: Vec<Certificate>,
    }

    struct FakeEntry<'a> {
        remaining: &'a [u8],
        fail: bool,
        done: bool,
        certificates: &'a [Certificate],
    }

    impl Drop for FakeArchive {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ArchiveOpener for FakeOpener {
        fn open(&self, _path: &Path) -> Result<Box<dyn PackageArchive>, PSError> {
            Ok(Box::new(FakeArchive {
                closed: self.closed.clone(),
                scenario: self.scenario,
                certificates: self.certificates.clone(),
            }))
        }
    }

    impl PackageArchive for FakeArchive {
        fn open_entry(
            &mut self,
            _name: &str,
        ) -> Result<Option<Box<dyn PackageEntry + '_>>, PSError> {
            let certificates: &[Certificate] = match self.scenario {
                Scenario::MissingEntry => return Ok(None),
                Scenario::Unsigned => &[],
                Scenario::ReadError | Scenario::Signed => &self.certificates,
            };
            Ok(Some(Box::new(FakeEntry {
                remaining: b"dex\n035\0 payload",
                fail: matches!(self.scenario, Scenario::ReadError),
                done: false,
                certificates,
            })))
        }
    }

    impl Read for FakeEntry<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "truncated archive"));
            }
            let n = self.remaining.read(buf)?;
            if n == 0 && !buf.is_empty() {
                self.done = true;
            }
            Ok(n)
        }
    }

    impl PackageEntry for FakeEntry<'_> {
        fn certificates(&self) -> Option<&[Certificate]> {
            if self.done && !self.certificates.is_empty() {
                Some(self.certificates)
            } else {
                None
            }
        }
    }

    fn run(
        verifier: SignatureVerifier,
        scenario: Scenario,
        certificates: Vec<Certificate>,
    ) -> (Result<Acceptance, PSError>, usize) {
        let closed = Arc::new(AtomicUsize::new(0));
        let verifier = verifier.with_opener(FakeOpener {
            closed: closed.clone(),
            scenario,
            certificates,
        });
        let result = verifier.try_verify_package("fake.zip");
        (result, closed.load(Ordering::SeqCst))
    }

    #[test]
    fn test_archive_released_once_on_every_path() {
        let (host, host_key) = issue("Host", None);
        let (stranger, _) = issue("Stranger", None);
        let (leaf, _) = issue("Leaf", Some((&host, &host_key)));

        let (result, closed) = run(verifier_for(&host), Scenario::MissingEntry, Vec::new());
        assert!(matches!(result, Err(PSError::MissingPayloadEntry(_))));
        assert_eq!(closed, 1);

        let (result, closed) = run(verifier_for(&host), Scenario::ReadError, vec![parsed(&leaf)]);
        assert!(matches!(result, Err(PSError::IOError(_))));
        assert_eq!(closed, 1);

        let (result, closed) = run(verifier_for(&host), Scenario::Unsigned, Vec::new());
        assert!(matches!(result, Err(PSError::MissingCertificates(_))));
        assert_eq!(closed, 1);

        let (result, closed) = run(verifier_for(&host), Scenario::Signed, vec![parsed(&stranger)]);
        assert!(matches!(result, Err(PSError::CertificateVerifyMismatch)));
        assert_eq!(closed, 1);

        let (result, closed) = run(verifier_for(&host), Scenario::Signed, vec![parsed(&leaf)]);
        assert!(matches!(result, Ok(Acceptance::Verified { .. })));
        assert_eq!(closed, 1);
    }

    #[test]
    fn test_unavailable_anchor_never_opens_archive() {
        let verifier =
            SignatureVerifier::with_anchor(TrustAnchor::unavailable(), VerifierConfig::default());
        let (result, closed) = run(verifier, Scenario::Signed, Vec::new());
        assert!(matches!(result, Err(PSError::TrustAnchorUnavailable)));
        assert_eq!(closed, 0);
    }

    #[test]
    fn test_chain_is_checked_from_the_end() {
        let (host, host_key) = issue("CertA", None);
        let (leaf, _) = issue("CertB", Some((&host, &host_key)));
        let verifier = verifier_for(&host);

        // Both certificates verify under the anchor key; the last one wins.
        let chain = vec![parsed(&leaf), parsed(&host)];
        let matched = verifier.check_chain(&chain).unwrap();
        assert_eq!(matched.subject().get("CN"), Some("CertA"));

        let reversed = vec![parsed(&host), parsed(&leaf)];
        let matched = verifier.check_chain(&reversed).unwrap();
        assert_eq!(matched.subject().get("CN"), Some("CertB"));
    }

    #[test]
    fn test_check() {
        let (host, host_key) = issue("Host", None);
        let (leaf, _) = issue("Leaf", Some((&host, &host_key)));
        let (stranger, stranger_key) = issue("Stranger", None);
        let (stranger_leaf, _) = issue("Stranger Leaf", Some((&stranger, &stranger_key)));
        let verifier = verifier_for(&host);

        assert!(verifier.check(&[parsed(&leaf)]));
        assert!(verifier.check(&[parsed(&stranger_leaf), parsed(&leaf)]));
        assert!(!verifier.check(&[parsed(&stranger_leaf), parsed(&stranger)]));
        assert!(!verifier.check(&[]));
        assert!(matches!(
            verifier.check_chain(&[]),
            Err(PSError::MissingCertificates(_))
        ));
    }

    #[test]
    fn test_new_degrades_silently() {
        let host = crate::host::StaticHost::new("app", vec![b"not a certificate".to_vec()]);
        let verifier = SignatureVerifier::new(&host);
        assert!(!verifier.anchor().is_available());
        assert!(!verifier.verify_package("/nonexistent/package.zip"));
        assert!(!verifier.check(&[]));
    }

    #[test]
    fn test_verifier_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SignatureVerifier>();
    }
}

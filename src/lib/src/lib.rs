//! Decide whether a package archive may be loaded by checking that it was
//! signed with the same key as the running host.
//!
//! The host's first signing certificate is captured once as the trust anchor.
//! A package is accepted when its marker entry (`classes.dex` by default) is
//! covered by a v1 JAR signature whose certificate chain contains a
//! certificate signed by the anchor key. Hosts signed with the standard
//! debug identity accept every package.

#![forbid(unsafe_code)]

mod anchor;
mod config;
mod error;
mod hash;
mod keys;
mod oids;
mod sign;
mod verifier;

/// Signed archive reading
///
/// Parses `META-INF/MANIFEST.MF`, signature files and their CMS signature
/// blocks, and streams entries while checking their digests.
pub mod archive;

/// X.509 certificates and distinguished names
pub mod certificate;

/// Sources for the host's own signing certificates
pub mod host;

pub use anchor::TrustAnchor;
pub use certificate::{Certificate, DistinguishedName};
pub use config::{VerifierConfig, DEBUG_IDENTITY, DEFAULT_MARKER_ENTRY};
pub use error::*;
pub use hash::DigestAlgorithm;
pub use host::{CertificateFile, HostPackage, InstalledArchive, StaticHost};
pub use keys::{KeyAlgorithm, PublicKey, SignatureAlgorithm, SignatureScheme};
pub use sign::PackageSigner;
pub use verifier::{Acceptance, SignatureVerifier};

pub mod reexports {
    pub use log;
    pub use thiserror;
}

use crate::{oids, PSError};
use sha2::digest::DynDigest;
use spki::ObjectIdentifier;
use std::fmt;
use std::io::{self, Write};

/// Digest algorithms accepted in manifests, signature files and signer infos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Order in which digest attributes are looked up. The first one present decides.
    pub const STRONGEST_FIRST: [DigestAlgorithm; 4] = [
        DigestAlgorithm::Sha512,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha1,
    ];

    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self, PSError> {
        let algorithm = if *oid == oids::SHA1 {
            DigestAlgorithm::Sha1
        } else if *oid == oids::SHA256 {
            DigestAlgorithm::Sha256
        } else if *oid == oids::SHA384 {
            DigestAlgorithm::Sha384
        } else if *oid == oids::SHA512 {
            DigestAlgorithm::Sha512
        } else {
            return Err(PSError::UnsupportedAlgorithm(format!("digest {oid}")));
        };
        Ok(algorithm)
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => oids::SHA1,
            DigestAlgorithm::Sha256 => oids::SHA256,
            DigestAlgorithm::Sha384 => oids::SHA384,
            DigestAlgorithm::Sha512 => oids::SHA512,
        }
    }

    /// Attribute name prefixes used in manifests, e.g. `SHA-256` in `SHA-256-Digest`.
    pub fn manifest_names(&self) -> &'static [&'static str] {
        match self {
            DigestAlgorithm::Sha1 => &["SHA1", "SHA-1"],
            DigestAlgorithm::Sha256 => &["SHA-256"],
            DigestAlgorithm::Sha384 => &["SHA-384"],
            DigestAlgorithm::Sha512 => &["SHA-512"],
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hash = Hash::new(*self);
        hash.update(data);
        hash.finalize()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_names()[0])
    }
}

/// Incremental hash over any supported digest algorithm.
pub(crate) struct Hash {
    algorithm: DigestAlgorithm,
    inner: Box<dyn DynDigest + Send + Sync>,
}

impl Hash {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let inner: Box<dyn DynDigest + Send + Sync> = match algorithm {
            DigestAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            DigestAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            DigestAlgorithm::Sha384 => Box::new(sha2::Sha384::default()),
            DigestAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
        };
        Hash { algorithm, inner }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn update<T: AsRef<[u8]>>(&mut self, data: T) {
        self.inner.update(data.as_ref());
    }

    pub fn finalize(self) -> Vec<u8> {
        self.inner.finalize().into_vec()
    }
}

impl Write for Hash {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

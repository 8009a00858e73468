//! Reading ZIP archives that carry v1 JAR signature metadata.
//!
//! Opening an archive checks every signer up front: each `META-INF/*.SF`
//! must be signed by its matching signature block, and must agree with
//! `META-INF/MANIFEST.MF`. Entry content is only checked while it is
//! streamed, so the certificates of an entry become available once the
//! entry has been read to the end and its digest matched.

mod manifest;
mod signature_block;

pub use manifest::{Manifest, ManifestWriter, Section};
pub use signature_block::{SignatureBlock, VerifiedSigner};

use crate::certificate::Certificate;
use crate::hash::Hash;
use crate::PSError;

use log::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

const META_INF: &str = "META-INF/";
const SIGNATURE_FILE_EXTENSION: &str = ".SF";
const SIGNATURE_BLOCK_EXTENSIONS: [&str; 3] = [".RSA", ".EC", ".DSA"];

/// Upper bound for the size of signature metadata files.
const MAX_METADATA_SIZE: u64 = 16 * 1024 * 1024;

/// True for `META-INF` files that make up the signature itself.
pub fn is_signature_metadata(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    let Some(file) = upper.strip_prefix(META_INF) else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    upper == MANIFEST_NAME
        || file.ends_with(SIGNATURE_FILE_EXTENSION)
        || SIGNATURE_BLOCK_EXTENSIONS.iter().any(|ext| file.ends_with(ext))
}

/// An opened package archive.
pub trait PackageArchive {
    /// Opens the entry `name` for streaming, or returns `None` if the archive
    /// has no such entry.
    fn open_entry(&mut self, name: &str) -> Result<Option<Box<dyn PackageEntry + '_>>, PSError>;
}

/// An entry stream whose certificates are known once it was read to the end.
pub trait PackageEntry: Read {
    /// The certificate chains of all signers covering this entry, leaf first.
    ///
    /// `None` until the stream reached EOF with a matching digest, and for
    /// entries no signer covers.
    fn certificates(&self) -> Option<&[Certificate]>;
}

/// Opens package archives by path.
pub trait ArchiveOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn PackageArchive>, PSError>;
}

/// Opens archives from the filesystem as [`SignedArchive`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipOpener;

impl ArchiveOpener for ZipOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn PackageArchive>, PSError> {
        let archive = SignedArchive::open(path).map_err(|e| match e {
            PSError::IOError(_) | PSError::ZipError(_) => {
                PSError::ArchiveOpenError(format!("{}: {}", path.display(), e))
            }
            other => other,
        })?;
        Ok(Box::new(archive))
    }
}

/// A ZIP archive whose v1 signatures have been checked.
pub struct SignedArchive<R: Read + Seek = BufReader<File>> {
    zip: ZipArchive<R>,
    manifest: Option<Manifest>,
    signers: Vec<VerifiedSigner>,
    coverage: HashMap<String, Vec<usize>>,
}

impl SignedArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PSError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> SignedArchive<R> {
    pub fn new(reader: R) -> Result<Self, PSError> {
        let mut zip = ZipArchive::new(reader)?;

        let manifest_name = zip
            .file_names()
            .find(|name| name.eq_ignore_ascii_case(MANIFEST_NAME))
            .map(str::to_string);
        let manifest = match manifest_name {
            Some(name) => Some(Manifest::parse(read_metadata(&mut zip, &name)?)?),
            None => {
                debug!("Archive has no manifest");
                None
            }
        };

        let mut archive = SignedArchive {
            zip,
            manifest: None,
            signers: Vec::new(),
            coverage: HashMap::new(),
        };
        if let Some(manifest) = manifest {
            archive.load_signers(&manifest)?;
            archive.manifest = Some(manifest);
        }
        Ok(archive)
    }

    fn load_signers(&mut self, manifest: &Manifest) -> Result<(), PSError> {
        let mut signature_files: Vec<String> = self
            .zip
            .file_names()
            .filter(|name| {
                let upper = name.to_ascii_uppercase();
                upper.starts_with(META_INF)
                    && !upper[META_INF.len()..].contains('/')
                    && upper.ends_with(SIGNATURE_FILE_EXTENSION)
            })
            .map(str::to_string)
            .collect();
        signature_files.sort();

        for sf_name in signature_files {
            let base = &sf_name[..sf_name.len() - SIGNATURE_FILE_EXTENSION.len()];
            let block_name = self
                .zip
                .file_names()
                .find(|name| match (name.get(..base.len()), name.get(base.len()..)) {
                    (Some(prefix), Some(ext)) => {
                        prefix.eq_ignore_ascii_case(base)
                            && SIGNATURE_BLOCK_EXTENSIONS
                                .iter()
                                .any(|known| ext.eq_ignore_ascii_case(known))
                    }
                    _ => false,
                })
                .map(str::to_string);
            let Some(block_name) = block_name else {
                warn!("No signature block for {sf_name}");
                continue;
            };

            let sf_bytes = read_metadata(&mut self.zip, &sf_name)?;
            let block = SignatureBlock::parse(&read_metadata(&mut self.zip, &block_name)?)?;
            let verified = block.verify(&sf_bytes)?;
            let signature_file = Manifest::parse(sf_bytes)?;
            let covered = covered_entries(&signature_file, manifest, &sf_name)?;
            debug!(
                "{sf_name}: {} signer(s), {} entries covered",
                verified.len(),
                covered.len()
            );

            for signer in verified {
                let index = self.signers.len();
                self.signers.push(signer);
                for name in &covered {
                    self.coverage.entry(name.clone()).or_default().push(index);
                }
            }
        }
        Ok(())
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// All verified signers, in signature file order.
    pub fn signers(&self) -> &[VerifiedSigner] {
        &self.signers
    }

    /// The certificate chains of all verified signers.
    pub fn signer_certificates(&self) -> Vec<&[Certificate]> {
        self.signers.iter().map(VerifiedSigner::chain).collect()
    }

    /// Names of all entries in the archive.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.zip.file_names()
    }

    /// Number of signers covering `name`.
    pub fn coverage(&self, name: &str) -> usize {
        self.coverage.get(name).map_or(0, Vec::len)
    }

    /// Open an entry for streaming.
    pub fn entry(&mut self, name: &str) -> Result<Option<SignedEntry<'_>>, PSError> {
        let expected = self
            .manifest
            .as_ref()
            .and_then(|manifest| manifest.section(name))
            .and_then(|section| section.digest("-Digest"));
        let certificates: Vec<Certificate> = self
            .coverage
            .get(name)
            .into_iter()
            .flatten()
            .flat_map(|&index| self.signers[index].chain().iter().cloned())
            .collect();

        let file = match self.zip.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if file.is_dir() {
            return Ok(None);
        }

        let digest = expected.map(|(algorithm, expected)| EntryDigest {
            hash: Hash::new(algorithm),
            expected,
        });
        Ok(Some(SignedEntry {
            name: name.to_string(),
            reader: file,
            digest,
            pending: certificates,
            state: EntryState::Unread,
        }))
    }
}

impl<R: Read + Seek> PackageArchive for SignedArchive<R> {
    fn open_entry(&mut self, name: &str) -> Result<Option<Box<dyn PackageEntry + '_>>, PSError> {
        Ok(self
            .entry(name)?
            .map(|entry| Box::new(entry) as Box<dyn PackageEntry + '_>))
    }
}

/// Names of the entries a signature file vouches for.
fn covered_entries(
    signature_file: &Manifest,
    manifest: &Manifest,
    sf_name: &str,
) -> Result<Vec<String>, PSError> {
    let main = signature_file.main_attributes();
    let manifest_main = manifest
        .raw_section(manifest.main_attributes())
        .ok_or_else(|| PSError::ManifestError("main section out of range".to_string()))?;
    if main.check_digest("-Digest-Manifest-Main-Attributes", manifest_main) == Some(false) {
        return Err(PSError::SignatureFileMismatch(format!(
            "{sf_name}: main attributes"
        )));
    }
    let whole_manifest = main.check_digest("-Digest-Manifest", manifest.as_bytes()) == Some(true);

    let mut covered = Vec::new();
    for section in signature_file.sections() {
        let Some(name) = section.name() else {
            continue;
        };
        let Some(entry) = manifest.section(name) else {
            debug!("{sf_name} names {name}, which is not in the manifest");
            continue;
        };
        let raw = manifest
            .raw_section(entry)
            .ok_or_else(|| PSError::ManifestError(format!("section {name} out of range")))?;
        if !whole_manifest && section.check_digest("-Digest", raw) != Some(true) {
            return Err(PSError::SignatureFileMismatch(format!("{sf_name}: {name}")));
        }
        covered.push(name.to_string());
    }
    Ok(covered)
}

fn read_metadata<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, PSError> {
    let file = zip.by_name(name)?;
    let mut data = Vec::with_capacity(file.size().min(MAX_METADATA_SIZE) as usize);
    file.take(MAX_METADATA_SIZE + 1).read_to_end(&mut data)?;
    if data.len() as u64 > MAX_METADATA_SIZE {
        return Err(PSError::ManifestError(format!("{name} is too large")));
    }
    Ok(data)
}

struct EntryDigest {
    hash: Hash,
    expected: Vec<u8>,
}

enum EntryState {
    Unread,
    Read { certificates: Vec<Certificate> },
    Failed,
}

/// A streamed archive entry that checks its manifest digest at EOF.
pub struct SignedEntry<'a> {
    name: String,
    reader: ZipFile<'a>,
    digest: Option<EntryDigest>,
    pending: Vec<Certificate>,
    state: EntryState,
}

impl SignedEntry<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_fully_read(&self) -> bool {
        matches!(self.state, EntryState::Read { .. })
    }

    /// See [`PackageEntry::certificates`].
    pub fn certificates(&self) -> Option<&[Certificate]> {
        match &self.state {
            EntryState::Read { certificates } if !certificates.is_empty() => Some(certificates),
            _ => None,
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        let Some(digest) = self.digest.take() else {
            debug!("{} has no manifest digest", self.name);
            self.state = EntryState::Read {
                certificates: Vec::new(),
            };
            return Ok(());
        };
        let algorithm = digest.hash.algorithm();
        if digest.hash.finalize() != digest.expected {
            self.state = EntryState::Failed;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                PSError::DigestMismatch(format!("{} ({algorithm})", self.name)),
            ));
        }
        self.state = EntryState::Read {
            certificates: std::mem::take(&mut self.pending),
        };
        Ok(())
    }
}

impl Read for SignedEntry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.state {
            EntryState::Read { .. } => return Ok(0),
            EntryState::Failed => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    PSError::DigestMismatch(self.name.clone()),
                ))
            }
            EntryState::Unread => {}
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.reader.read(buf)?;
        if n > 0 {
            if let Some(digest) = &mut self.digest {
                digest.hash.update(&buf[..n]);
            }
            return Ok(n);
        }
        self.finish()?;
        Ok(0)
    }
}

impl PackageEntry for SignedEntry<'_> {
    fn certificates(&self) -> Option<&[Certificate]> {
        SignedEntry::certificates(self)
    }
}

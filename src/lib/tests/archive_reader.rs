//! Reading signed archives entry by entry.

mod common;

use common::*;
use patchsig::archive::SignedArchive;
use patchsig::PSError;
use std::io::Read;

#[test]
fn test_certificates_only_after_full_read() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Identity::self_signed("Signer");
    let path = dir.path().join("signed.zip");
    let big = vec![0x5au8; 100_000];
    write_signed(&path, &signer.signer(), &[("classes.dex", &big[..])]);

    let mut archive = SignedArchive::open(&path).unwrap();
    let mut entry = archive.entry("classes.dex").unwrap().unwrap();
    assert_eq!(entry.name(), "classes.dex");
    assert!(entry.certificates().is_none());

    let mut buf = [0u8; 4096];
    entry.read_exact(&mut buf).unwrap();
    assert!(entry.certificates().is_none());
    assert!(!entry.is_fully_read());

    let mut rest = Vec::new();
    entry.read_to_end(&mut rest).unwrap();
    assert_eq!(rest.len() + buf.len(), big.len());
    let chain = entry.certificates().unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0], signer.certificate());

    // Further reads stay at EOF.
    assert_eq!(entry.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_signer_chains() {
    let dir = tempfile::tempdir().unwrap();
    let root = Identity::self_signed("Root");
    let intermediate = root.issue("Intermediate");
    let leaf = intermediate.issue("Leaf");
    let path = dir.path().join("signed.zip");
    write_signed(
        &path,
        // Deliberately out of order: the chain is rebuilt from issuer names.
        &leaf.signer_with_chain(&[&root, &intermediate]),
        &[("classes.dex", DEX)],
    );

    let archive = SignedArchive::open(&path).unwrap();
    let chains = archive.signer_certificates();
    assert_eq!(chains.len(), 1);
    let names: Vec<_> = chains[0]
        .iter()
        .map(|cert| cert.subject().get("CN").unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Leaf", "Intermediate", "Root"]);
}

#[test]
fn test_entries_outside_the_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.zip");
    write_zip(&path, &[("classes.dex", DEX)]);

    let mut archive = SignedArchive::open(&path).unwrap();
    assert!(archive.manifest().is_none());
    assert!(archive.signers().is_empty());
    assert!(archive.entry("missing.dex").unwrap().is_none());

    let mut entry = archive.entry("classes.dex").unwrap().unwrap();
    std::io::copy(&mut entry, &mut std::io::sink()).unwrap();
    assert!(entry.is_fully_read());
    assert!(entry.certificates().is_none());
}

#[test]
fn test_digest_mismatch_surfaces_as_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Identity::self_signed("Signer");
    let signed = dir.path().join("signed.zip");
    write_signed(&signed, &signer.signer(), &[("classes.dex", DEX)]);
    let tampered = dir.path().join("tampered.zip");
    rewrite_zip(&signed, &tampered, |name, data| {
        (name == "classes.dex").then(|| data.iter().rev().copied().collect())
    });

    let mut archive = SignedArchive::open(&tampered).unwrap();
    let mut entry = archive.entry("classes.dex").unwrap().unwrap();
    let err = entry.read_to_end(&mut Vec::new()).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    assert!(matches!(
        PSError::from_read_error(err),
        PSError::DigestMismatch(_)
    ));
    assert!(entry.certificates().is_none());
    assert!(entry.read(&mut [0u8; 16]).is_err());
}

#[test]
fn test_signature_block_without_signature_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Identity::self_signed("Signer");
    let signed = dir.path().join("signed.zip");
    write_signed(&signed, &signer.signer(), &[("classes.dex", DEX)]);

    // Rename the signature file so the block has no partner.
    let orphaned = dir.path().join("orphaned.zip");
    {
        use std::io::Write;
        let mut archive = zip::ZipArchive::new(std::fs::File::open(&signed).unwrap()).unwrap();
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&orphaned).unwrap());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let name = match file.name() {
                "META-INF/CERT.SF" => "META-INF/OTHER.SF".to_string(),
                other => other.to_string(),
            };
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            writer.start_file(name, zip::write::FileOptions::default()).unwrap();
            writer.write_all(&data).unwrap();
        }
        writer.finish().unwrap();
    }

    let archive = SignedArchive::open(&orphaned).unwrap();
    assert!(archive.signers().is_empty());
    assert_eq!(archive.coverage("classes.dex"), 0);
}

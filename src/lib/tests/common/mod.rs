//! Fixtures shared by the integration tests: signing identities generated
//! with rcgen and packages written into temporary directories.

#![allow(dead_code)]

use patchsig::{Certificate, PackageSigner, StaticHost};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// A key pair and the certificate binding it to a subject.
pub struct Identity {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Identity {
    /// A self-signed identity with a single common name.
    pub fn self_signed(common_name: &str) -> Self {
        Self::with_name(&[(DnType::CommonName, common_name)], None)
    }

    /// The standard debug signing identity, `CN=Android Debug,O=Android,C=US`.
    pub fn debug() -> Self {
        Self::with_name(
            &[
                (DnType::CountryName, "US"),
                (DnType::OrganizationName, "Android"),
                (DnType::CommonName, "Android Debug"),
            ],
            None,
        )
    }

    /// An identity whose certificate is signed by `self`.
    pub fn issue(&self, common_name: &str) -> Self {
        Self::with_name(&[(DnType::CommonName, common_name)], Some(self))
    }

    fn with_name(rdns: &[(DnType, &str)], issuer: Option<&Identity>) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        for (ty, value) in rdns {
            params.distinguished_name.push(ty.clone(), *value);
        }
        let cert = match issuer {
            Some(issuer) => params.signed_by(&key, &issuer.cert, &issuer.key).unwrap(),
            None => params.self_signed(&key).unwrap(),
        };
        Identity { cert, key }
    }

    pub fn certificate(&self) -> Certificate {
        Certificate::from_der(self.cert.der()).unwrap()
    }

    /// A host whose first signing certificate is this identity's.
    pub fn host(&self) -> StaticHost {
        StaticHost::new("com.example.host", vec![self.cert.der().to_vec()])
    }

    /// A signer embedding `chain` after this identity's own certificate.
    pub fn signer_with_chain(&self, chain: &[&Identity]) -> PackageSigner {
        let mut pem = self.cert.pem();
        for issuer in chain {
            pem.push_str(&issuer.cert.pem());
        }
        PackageSigner::from_pem(&self.key.serialize_pem(), &pem).unwrap()
    }

    pub fn signer(&self) -> PackageSigner {
        self.signer_with_chain(&[])
    }
}

pub const DEX: &[u8] = b"dex\n035\0 classes payload";

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Write `entries` to a temporary zip and sign it into `path`.
pub fn write_signed(path: &Path, signer: &PackageSigner, entries: &[(&str, &[u8])]) {
    let unsigned = path.with_extension("unsigned.zip");
    write_zip(&unsigned, entries);
    signer.sign_file(&unsigned, path).unwrap();
}

/// Copy `src` to `dst`, replacing the contents of entries for which `edit`
/// returns `Some`.
pub fn rewrite_zip(src: &Path, dst: &Path, edit: impl Fn(&str, &[u8]) -> Option<Vec<u8>>) {
    let mut archive = ZipArchive::new(File::open(src).unwrap()).unwrap();
    let mut writer = ZipWriter::new(File::create(dst).unwrap());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let name = file.name().to_string();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        let data = edit(&name, &data).unwrap_or(data);
        writer.start_file(name, FileOptions::default()).unwrap();
        writer.write_all(&data).unwrap();
    }
    writer.finish().unwrap();
}

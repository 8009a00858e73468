use patchsig::archive::SignedArchive;
use patchsig::{
    Acceptance, CertificateFile, DistinguishedName, HostPackage, InstalledArchive, PSError,
    PackageSigner, SignatureVerifier, VerifierConfig,
};

use patchsig::reexports::log;

use clap::{Arg, ArgAction, Command, crate_description, crate_name, crate_version};
use rcgen::{CertificateParams, DnType, KeyPair};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Helper function to write a file, creating parent directories
fn write_file(path: impl AsRef<Path>, contents: &str) -> Result<(), PSError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            PSError::InternalError(format!(
                "Failed to create parent directory for '{}': {}",
                path.display(),
                e
            ))
        })?;
    }
    std::fs::write(path, contents).map_err(|e| {
        PSError::InternalError(format!("Failed to write file '{}': {}", path.display(), e))
    })
}

/// A signed archive is used as the host's installed package, anything else
/// as a certificate file.
fn host_package(path: &str) -> Result<Box<dyn HostPackage>, PSError> {
    let mut magic = [0u8; 4];
    let is_archive = File::open(path)
        .and_then(|mut file| file.read_exact(&mut magic))
        .map(|_| &magic == ZIP_MAGIC)
        .unwrap_or(false);
    let name = Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    if is_archive {
        Ok(Box::new(InstalledArchive::new(name, path)))
    } else {
        Ok(Box::new(CertificateFile::new(name, path)))
    }
}

fn rcgen_name(dn: &DistinguishedName) -> rcgen::DistinguishedName {
    let mut name = rcgen::DistinguishedName::new();
    for (oid, value) in dn.attributes() {
        let ty = match oid.to_string().as_str() {
            "2.5.4.3" => DnType::CommonName,
            "2.5.4.6" => DnType::CountryName,
            "2.5.4.7" => DnType::LocalityName,
            "2.5.4.8" => DnType::StateOrProvinceName,
            "2.5.4.10" => DnType::OrganizationName,
            "2.5.4.11" => DnType::OrganizationalUnitName,
            _ => DnType::CustomDnType(oid.arcs().map(u64::from).collect()),
        };
        name.push(ty, value);
    }
    name
}

fn start() -> Result<(), PSError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Verbose output"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .subcommand(
            Command::new("verify")
                .about("Check that a package was signed by the host's signing key")
                .arg(
                    Arg::new("host")
                        .value_name("host_file")
                        .long("host")
                        .short('H')
                        .required(true)
                        .help("Host installed archive, or its signing certificate (PEM or DER)"),
                )
                .arg(
                    Arg::new("package")
                        .value_name("package_file")
                        .long("package")
                        .short('p')
                        .required(true)
                        .help("Package archive to verify"),
                )
                .arg(
                    Arg::new("config")
                        .value_name("config_file")
                        .long("config")
                        .short('c')
                        .help("JSON verifier configuration"),
                )
                .arg(
                    Arg::new("marker")
                        .value_name("entry")
                        .long("marker")
                        .short('m')
                        .help("Entry whose signature is checked (overrides the configuration)"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Print the signers of a package")
                .arg(
                    Arg::new("package")
                        .value_name("package_file")
                        .long("package")
                        .short('p')
                        .required(true)
                        .help("Package archive"),
                ),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate a P-256 key and a self-signed certificate")
                .arg(
                    Arg::new("key")
                        .value_name("key_file")
                        .long("key")
                        .short('k')
                        .required(true)
                        .help("Private key output file (PKCS#8 PEM)"),
                )
                .arg(
                    Arg::new("cert")
                        .value_name("cert_file")
                        .long("cert")
                        .short('c')
                        .required(true)
                        .help("Certificate output file (PEM)"),
                )
                .arg(
                    Arg::new("subject")
                        .value_name("dn")
                        .long("subject")
                        .short('s')
                        .default_value("CN=patchsig developer")
                        .help("Certificate subject"),
                ),
        )
        .subcommand(
            Command::new("sign")
                .about("Sign a package")
                .arg(
                    Arg::new("key")
                        .value_name("key_file")
                        .long("key")
                        .short('k')
                        .required(true)
                        .help("Private key file (PKCS#8 PEM)"),
                )
                .arg(
                    Arg::new("cert")
                        .value_name("cert_file")
                        .long("cert")
                        .short('c')
                        .required(true)
                        .help("Certificate chain file (PEM, leaf first)"),
                )
                .arg(
                    Arg::new("in")
                        .value_name("input_file")
                        .long("input-file")
                        .short('i')
                        .required(true)
                        .help("Input file"),
                )
                .arg(
                    Arg::new("out")
                        .value_name("output_file")
                        .long("output-file")
                        .short('o')
                        .required(true)
                        .help("Output file"),
                ),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let debug = matches.get_flag("debug");

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    if let Some(matches) = matches.subcommand_matches("verify") {
        let host_file = matches
            .get_one::<String>("host")
            .ok_or(PSError::UsageError("Missing host file"))?;
        let package_file = matches
            .get_one::<String>("package")
            .ok_or(PSError::UsageError("Missing package file"))?;
        let mut config = match matches.get_one::<String>("config") {
            Some(config_file) => VerifierConfig::from_file(config_file)?,
            None => VerifierConfig::default(),
        };
        if let Some(marker) = matches.get_one::<String>("marker") {
            config = config.with_marker_entry(marker.as_str());
        }

        let host = host_package(host_file)?;
        let verifier = SignatureVerifier::with_config(host.as_ref(), config);
        if verbose {
            match verifier.anchor().subject() {
                Some(subject) => println!("Trust anchor: [{subject}]"),
                None => println!("Trust anchor: unavailable"),
            }
        }
        match verifier.try_verify_package(package_file) {
            Ok(Acceptance::DebugBypass) => {
                println!("✓ Debug-signed host: [{package_file}] accepted without verification");
            }
            Ok(Acceptance::Verified { subject }) => {
                println!("✓ [{package_file}] accepted, signed by [{subject}]");
            }
            Err(e) => {
                println!("✗ [{package_file}] rejected");
                return Err(e);
            }
        }
    } else if let Some(matches) = matches.subcommand_matches("show") {
        let package_file = matches
            .get_one::<String>("package")
            .ok_or(PSError::UsageError("Missing package file"))?;
        let archive = SignedArchive::open(package_file)?;
        if archive.signers().is_empty() {
            println!("[{package_file}] is not signed");
        }
        for (i, chain) in archive.signer_certificates().iter().enumerate() {
            println!("Signer #{i}:");
            for cert in chain.iter() {
                println!("  - subject:     {}", cert.subject());
                println!("    issuer:      {}", cert.issuer());
                println!("    serial:      {}", cert.serial_hex());
                println!("    key:         {}", cert.public_key().algorithm());
                println!("    fingerprint: {}", cert.fingerprint());
            }
        }
        if verbose {
            println!("Entries:");
            for name in archive.entry_names() {
                println!("  {name} (signers: {})", archive.coverage(name));
            }
        }
    } else if let Some(matches) = matches.subcommand_matches("keygen") {
        let key_file = matches
            .get_one::<String>("key")
            .ok_or(PSError::UsageError("Missing key file"))?;
        let cert_file = matches
            .get_one::<String>("cert")
            .ok_or(PSError::UsageError("Missing certificate file"))?;
        let subject = matches
            .get_one::<String>("subject")
            .ok_or(PSError::UsageError("Missing subject"))?;
        let subject = DistinguishedName::parse(subject)?;

        let key = KeyPair::generate().map_err(|e| PSError::SigningError(e.to_string()))?;
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen_name(&subject);
        let cert = params
            .self_signed(&key)
            .map_err(|e| PSError::SigningError(e.to_string()))?;

        write_file(key_file, &key.serialize_pem())?;
        println!("Private key saved to [{key_file}]");
        write_file(cert_file, &cert.pem())?;
        println!("Certificate for [{subject}] saved to [{cert_file}]");
    } else if let Some(matches) = matches.subcommand_matches("sign") {
        let key_file = matches
            .get_one::<String>("key")
            .ok_or(PSError::UsageError("Missing key file"))?;
        let cert_file = matches
            .get_one::<String>("cert")
            .ok_or(PSError::UsageError("Missing certificate file"))?;
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(PSError::UsageError("Missing input file"))?;
        let output_file = matches
            .get_one::<String>("out")
            .ok_or(PSError::UsageError("Missing output file"))?;
        let signer = PackageSigner::from_files(key_file, cert_file)?;
        signer.sign_file(input_file, output_file)?;
        println!(
            "[{output_file}] signed by [{}]",
            signer.certificate().subject()
        );
    } else {
        return Err(PSError::UsageError("No subcommand specified"));
    }
    Ok(())
}

fn main() -> Result<(), PSError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

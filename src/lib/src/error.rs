/// The patchsig error type.
#[derive(Debug, thiserror::Error)]
pub enum PSError {
    #[error("Internal error: [{0}]")]
    InternalError(String),

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Host package lookup failed: {0}")]
    HostLookupError(String),

    #[error("Certificate parse error: {0}")]
    CertificateParseError(String),

    #[error("Cannot open archive: {0}")]
    ArchiveOpenError(String),

    #[error("Payload entry not found: {0}")]
    MissingPayloadEntry(String),

    #[error("No certificates for entry: {0}")]
    MissingCertificates(String),

    #[error("No certificate in the chain was signed by the trust anchor")]
    CertificateVerifyMismatch,

    #[error("Trust anchor unavailable")]
    TrustAnchorUnavailable,

    #[error("Manifest error: {0}")]
    ManifestError(String),

    #[error("Signature block error: {0}")]
    SignatureBlockError(String),

    #[error("Signature file does not match the manifest: {0}")]
    SignatureFileMismatch(String),

    #[error("Digest mismatch for {0}")]
    DigestMismatch(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid distinguished name: {0}")]
    InvalidDistinguishedName(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Usage error: {0}")]
    UsageError(&'static str),
}

impl PSError {
    /// Recovers the `PSError` an entry stream wrapped into an I/O error.
    pub fn from_read_error(err: std::io::Error) -> Self {
        if err.get_ref().map_or(false, |inner| inner.is::<PSError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(inner) = inner.downcast::<PSError>() {
                    return *inner;
                }
            }
            return PSError::InternalError("unrecoverable read error".to_string());
        }
        PSError::IOError(err)
    }
}

impl From<x509_parser::error::X509Error> for PSError {
    fn from(err: x509_parser::error::X509Error) -> Self {
        PSError::CertificateParseError(err.to_string())
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for PSError {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        PSError::CertificateParseError(err.to_string())
    }
}

impl From<der::Error> for PSError {
    fn from(err: der::Error) -> Self {
        PSError::SignatureBlockError(err.to_string())
    }
}

//! X.500 distinguished names with principal-style equality.
//!
//! Names are kept in encoding order (most significant RDN first). The string
//! form follows RFC 4514, which lists RDNs in the reverse order.

use crate::PSError;

use der::oid::db::DB;
use der::{Decode, Encode, Tag, Tagged};
use spki::ObjectIdentifier;
use std::fmt;
use std::str::FromStr;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::RdnSequence;

/// The value of a string-typed attribute.
fn value_str(atv: &AttributeTypeAndValue) -> Option<&str> {
    match atv.value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String | Tag::TeletexString => {
            std::str::from_utf8(atv.value.value()).ok()
        }
        _ => None,
    }
}

fn canonical(atv: &AttributeTypeAndValue) -> (String, String) {
    let value = match value_str(atv) {
        Some(value) => value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
        None => format!(
            "#{}",
            atv.value.to_der().map(hex::encode).unwrap_or_default()
        ),
    };
    (atv.oid.to_string(), value)
}

/// A distinguished name.
///
/// Two names are equal when they have the same RDN sequence, with attribute
/// values compared after case folding and whitespace normalization.
#[derive(Clone)]
pub struct DistinguishedName(RdnSequence);

impl DistinguishedName {
    /// Parse an RFC 4514 string such as `CN=Android Debug,O=Android,C=US`.
    pub fn parse(s: &str) -> Result<Self, PSError> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        RdnSequence::from_str(s)
            .map(DistinguishedName)
            .map_err(|e| PSError::InvalidDistinguishedName(format!("{s:?}: {e}")))
    }

    /// Decode a DER `Name`.
    pub fn from_der(der: &[u8]) -> Result<Self, PSError> {
        RdnSequence::from_der(der)
            .map(DistinguishedName)
            .map_err(|e| PSError::CertificateParseError(format!("Invalid name: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.0 .0.is_empty()
    }

    fn atvs(&self) -> impl Iterator<Item = &AttributeTypeAndValue> {
        self.0 .0.iter().flat_map(|rdn| rdn.0.iter())
    }

    /// String-valued attributes in encoding order.
    pub fn attributes(&self) -> impl Iterator<Item = (ObjectIdentifier, &str)> {
        self.atvs()
            .filter_map(|atv| value_str(atv).map(|value| (atv.oid, value)))
    }

    /// The value of the first attribute with the given keyword or dotted OID.
    pub fn get(&self, attribute: &str) -> Option<&str> {
        let oid = DB
            .by_name(attribute)
            .copied()
            .or_else(|| ObjectIdentifier::new(attribute).ok())?;
        self.atvs().find(|atv| atv.oid == oid).and_then(value_str)
    }

    fn canonical(&self) -> Vec<Vec<(String, String)>> {
        self.0
             .0
            .iter()
            .map(|rdn| {
                let mut avas: Vec<_> = rdn.0.iter().map(canonical).collect();
                avas.sort();
                avas
            })
            .collect()
    }
}

impl Default for DistinguishedName {
    fn default() -> Self {
        DistinguishedName(RdnSequence(Vec::new()))
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for DistinguishedName {}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DistinguishedName")
            .field(&self.to_string())
            .finish()
    }
}

impl FromStr for DistinguishedName {
    type Err = PSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

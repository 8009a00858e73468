//! `MANIFEST.MF` and signature file (`.SF`) parsing and writing.

use crate::hash::DigestAlgorithm;
use crate::PSError;

use base64::prelude::*;
use std::collections::HashMap;
use std::ops::Range;

const MAX_LINE_LENGTH: usize = 72;

/// One manifest section and the raw bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct Section {
    attributes: Vec<(String, String)>,
    range: Range<usize>,
}

impl Section {
    /// The `Name` attribute. Absent for the main section.
    pub fn name(&self) -> Option<&str> {
        self.get("Name")
    }

    /// Look up an attribute. Attribute names are case-insensitive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Find the strongest supported `<ALG><suffix>` attribute and decode it.
    ///
    /// A present but undecodable value yields an empty digest, which never
    /// matches.
    pub fn digest(&self, suffix: &str) -> Option<(DigestAlgorithm, Vec<u8>)> {
        for algorithm in DigestAlgorithm::STRONGEST_FIRST {
            for prefix in algorithm.manifest_names() {
                if let Some(value) = self.get(&format!("{prefix}{suffix}")) {
                    let expected = BASE64_STANDARD.decode(value.trim()).unwrap_or_default();
                    return Some((algorithm, expected));
                }
            }
        }
        None
    }

    /// Check the strongest supported `<ALG><suffix>` attribute against `data`.
    /// `None` when the section has no such attribute.
    pub fn check_digest(&self, suffix: &str, data: &[u8]) -> Option<bool> {
        self.digest(suffix)
            .map(|(algorithm, expected)| algorithm.digest(data) == expected)
    }
}

/// A parsed manifest: a main section followed by named sections.
#[derive(Debug, Clone)]
pub struct Manifest {
    bytes: Vec<u8>,
    main: Section,
    sections: Vec<Section>,
    by_name: HashMap<String, usize>,
}

impl Manifest {
    pub fn parse(bytes: Vec<u8>) -> Result<Self, PSError> {
        let mut sections = Vec::new();
        let mut current: Option<SectionBuilder> = None;
        let mut pos = 0;

        while pos < bytes.len() {
            let (line, next) = next_line(&bytes, pos);
            if line.is_empty() {
                if let Some(builder) = current.take() {
                    sections.push(builder.finish(next)?);
                } else if sections.is_empty() {
                    sections.push(Section {
                        attributes: Vec::new(),
                        range: 0..next,
                    });
                }
                pos = next;
                continue;
            }
            let builder = current.get_or_insert_with(|| SectionBuilder::new(pos));
            if line[0] == b' ' {
                builder.continue_value(&line[1..], pos)?;
            } else {
                builder.push_attribute(line, pos)?;
            }
            pos = next;
        }
        if let Some(builder) = current.take() {
            sections.push(builder.finish(bytes.len())?);
        }

        let mut sections = sections.into_iter();
        let main = sections.next().unwrap_or(Section {
            attributes: Vec::new(),
            range: 0..0,
        });
        let sections: Vec<Section> = sections.collect();

        let mut by_name = HashMap::new();
        for (index, section) in sections.iter().enumerate() {
            let name = section.name().ok_or_else(|| {
                PSError::ManifestError(format!(
                    "section at offset {} has no Name attribute",
                    section.range.start
                ))
            })?;
            if by_name.insert(name.to_string(), index).is_some() {
                return Err(PSError::ManifestError(format!(
                    "duplicate section for {name}"
                )));
            }
        }

        Ok(Manifest {
            bytes,
            main,
            sections,
            by_name,
        })
    }

    pub fn main_attributes(&self) -> &Section {
        &self.main
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.by_name.get(name).map(|&index| &self.sections[index])
    }

    /// Named sections in file order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// The whole manifest as read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw bytes of a section, including its terminating empty line.
    ///
    /// Returns `None` when `section` does not fit this manifest's bytes.
    pub fn raw_section(&self, section: &Section) -> Option<&[u8]> {
        self.bytes.get(section.range.clone())
    }
}

struct SectionBuilder {
    start: usize,
    attributes: Vec<(String, Vec<u8>)>,
}

impl SectionBuilder {
    fn new(start: usize) -> Self {
        SectionBuilder {
            start,
            attributes: Vec::new(),
        }
    }

    fn push_attribute(&mut self, line: &[u8], offset: usize) -> Result<(), PSError> {
        let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
            PSError::ManifestError(format!("invalid header at offset {offset}"))
        })?;
        let key = std::str::from_utf8(&line[..colon])
            .ok()
            .filter(|key| !key.is_empty() && !key.contains(' '))
            .ok_or_else(|| {
                PSError::ManifestError(format!("invalid attribute name at offset {offset}"))
            })?;
        let value = match line.get(colon + 1) {
            Some(b' ') => &line[colon + 2..],
            None => &[][..],
            Some(_) => {
                return Err(PSError::ManifestError(format!(
                    "missing space after ':' at offset {offset}"
                )))
            }
        };
        self.attributes.push((key.to_string(), value.to_vec()));
        Ok(())
    }

    fn continue_value(&mut self, rest: &[u8], offset: usize) -> Result<(), PSError> {
        let (_, value) = self.attributes.last_mut().ok_or_else(|| {
            PSError::ManifestError(format!("continuation without header at offset {offset}"))
        })?;
        value.extend_from_slice(rest);
        Ok(())
    }

    fn finish(self, end: usize) -> Result<Section, PSError> {
        let attributes = self
            .attributes
            .into_iter()
            .map(|(key, value)| {
                String::from_utf8(value)
                    .map(|value| (key.clone(), value))
                    .map_err(|_| PSError::ManifestError(format!("invalid UTF-8 in {key}")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Section {
            attributes,
            range: self.start..end,
        })
    }
}

/// Returns the line starting at `pos` without its terminator, and the start of
/// the next line.
fn next_line(bytes: &[u8], pos: usize) -> (&[u8], usize) {
    let rest = &bytes[pos..];
    match rest.iter().position(|&b| b == b'\r' || b == b'\n') {
        Some(i) if rest[i] == b'\r' && rest.get(i + 1) == Some(&b'\n') => (&rest[..i], pos + i + 2),
        Some(i) => (&rest[..i], pos + i + 1),
        None => (rest, bytes.len()),
    }
}

/// Writes manifest-formatted sections with CRLF line endings and 72-byte lines.
#[derive(Debug, Default)]
pub struct ManifestWriter {
    out: Vec<u8>,
    section_start: usize,
}

impl ManifestWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(&mut self, key: &str, value: &str) -> &mut Self {
        let mut line_len = key.len() + 2;
        self.out.extend_from_slice(key.as_bytes());
        self.out.extend_from_slice(b": ");
        for c in value.chars() {
            let mut buf = [0u8; 4];
            let encoded = c.encode_utf8(&mut buf).as_bytes();
            if line_len + encoded.len() > MAX_LINE_LENGTH {
                self.out.extend_from_slice(b"\r\n ");
                line_len = 1;
            }
            self.out.extend_from_slice(encoded);
            line_len += encoded.len();
        }
        self.out.extend_from_slice(b"\r\n");
        self
    }

    /// Terminates the current section and returns its byte range.
    pub fn end_section(&mut self) -> Range<usize> {
        self.out.extend_from_slice(b"\r\n");
        let range = self.section_start..self.out.len();
        self.section_start = self.out.len();
        range
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

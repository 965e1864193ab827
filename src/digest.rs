//! Content digests over type-specific byte ranges of a document

use crate::error::DocumentParseError;

//
// External dependencies
//
use memchr::memmem;
use sha1::{Digest, Sha1};
use sha2::Sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestEncoding {
    HexUpper,
    HexLower,
    /// Base64 without trailing `=` padding
    Base64,
}

/// Where to hash and how to encode the result
#[derive(Debug, Clone, Copy)]
pub struct DigestSpec {
    /// Token starting the range; must be at the start of a line
    pub start: &'static str,
    /// Token ending the range (inclusive); `None` hashes to the end of input
    pub end: Option<&'static str>,
    pub algorithm: DigestAlgorithm,
    pub encoding: DigestEncoding,
}

/// Find the first occurrence of `token` at the start of a line
fn find_line_start(raw: &[u8], token: &[u8]) -> Option<usize> {
    memmem::find_iter(raw, token).find(|&pos| pos == 0 || raw[pos - 1] == b'\n')
}

/// Locate the bytes from the first line starting with `start` through the
/// end of the first following occurrence of `end`.
pub fn locate<'a>(raw: &'a [u8], start: &str, end: Option<&str>) -> Result<&'a [u8], DocumentParseError> {
    let not_found = || DocumentParseError::ContentRangeNotFound {
        from: start.to_string(),
        to: end.unwrap_or("<end>").to_string(),
    };
    let from = find_line_start(raw, start.as_bytes()).ok_or_else(not_found)?;
    let to = match end {
        Some(end) => {
            let search_from = from + start.len();
            let pos = memmem::find(&raw[search_from..], end.as_bytes()).ok_or_else(not_found)?;
            search_from + pos + end.len()
        }
        None => raw.len(),
    };
    Ok(&raw[from..to])
}

pub fn hash(content: &[u8], algorithm: DigestAlgorithm) -> Vec<u8> {
    match algorithm {
        DigestAlgorithm::Sha1 => Sha1::digest(content).to_vec(),
        DigestAlgorithm::Sha256 => Sha256::digest(content).to_vec(),
    }
}

pub fn encode(bytes: &[u8], encoding: DigestEncoding) -> String {
    match encoding {
        DigestEncoding::HexUpper => hex::encode_upper(bytes),
        DigestEncoding::HexLower => hex::encode(bytes),
        DigestEncoding::Base64 => base64::encode_config(bytes, base64::STANDARD_NO_PAD),
    }
}

/// Compute the digest described by `spec` over `raw`.
pub fn compute(raw: &[u8], spec: &DigestSpec) -> Result<String, DocumentParseError> {
    let content = locate(raw, spec.start, spec.end)?;
    Ok(encode(&hash(content, spec.algorithm), spec.encoding))
}

/// Settle on a document's digest when it may declare one itself.
///
/// A declared digest is used verbatim. If the range can be located as
/// well, the computed value must match it. Without a declared digest, the
/// range must be locatable.
pub fn resolve(
    declared: Option<String>,
    raw: &[u8],
    spec: &DigestSpec,
) -> Result<String, DocumentParseError> {
    match declared {
        None => compute(raw, spec),
        Some(declared) => {
            if let Ok(computed) = compute(raw, spec) {
                let same = match spec.encoding {
                    DigestEncoding::Base64 => computed == declared,
                    _ => computed.eq_ignore_ascii_case(&declared),
                };
                if !same {
                    return Err(DocumentParseError::DigestMismatch { declared, computed });
                }
            }
            Ok(declared)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: DigestSpec = DigestSpec {
        start: "router ",
        end: Some("\nrouter-signature\n"),
        algorithm: DigestAlgorithm::Sha1,
        encoding: DigestEncoding::HexUpper,
    };

    const DOC: &[u8] = b"@type x 1.0\nrouter a 1.2.3.4 1 0 0\nplatform x\nrouter-signature\n-----BEGIN SIGNATURE-----\n-----END SIGNATURE-----\n";

    #[test]
    fn locates_range() {
        let range = locate(DOC, "router ", Some("\nrouter-signature\n")).unwrap();
        assert!(range.starts_with(b"router a"));
        assert!(range.ends_with(b"router-signature\n"));
        assert!(locate(DOC, "extra-info ", None).is_err());
        assert!(locate(b"router a\n", "router ", Some("\nrouter-signature\n")).is_err());
    }

    #[test]
    fn start_token_only_at_line_start() {
        let raw = b"xrouter a\nrouter b\n";
        assert_eq!(locate(raw, "router ", None).unwrap(), b"router b\n");
    }

    #[test]
    fn known_values() {
        assert_eq!(
            encode(&hash(b"abc", DigestAlgorithm::Sha1), DigestEncoding::HexLower),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            encode(&hash(b"abc", DigestAlgorithm::Sha256), DigestEncoding::Base64),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0"
        );
    }

    #[test]
    fn stable_and_range_sensitive() {
        let first = compute(DOC, &SPEC).unwrap();
        assert_eq!(first, compute(DOC, &SPEC).unwrap());
        assert_eq!(first.len(), 40);

        let mut inside = DOC.to_vec();
        let pos = memmem::find(&inside, b"platform x").unwrap() + 9;
        inside[pos] = b'y';
        assert_ne!(first, compute(&inside, &SPEC).unwrap());

        let mut outside = DOC.to_vec();
        outside[1] = b'T';
        let sig = memmem::find(&outside, b"-----END").unwrap();
        outside[sig + 9] = b's';
        assert_eq!(first, compute(&outside, &SPEC).unwrap());
    }

    #[test]
    fn declared_digest() {
        let computed = compute(DOC, &SPEC).unwrap();
        assert_eq!(
            resolve(Some(computed.to_lowercase()), DOC, &SPEC).unwrap(),
            computed.to_lowercase()
        );
        assert!(matches!(
            resolve(Some("00".repeat(20)), DOC, &SPEC),
            Err(DocumentParseError::DigestMismatch { .. })
        ));
        // no range to compare against
        assert_eq!(
            resolve(Some("AB".repeat(20)), b"router a\n", &SPEC).unwrap(),
            "AB".repeat(20)
        );
        assert!(resolve(None, b"router a\n", &SPEC).is_err());
    }
}

//! Sanitized bridge network statuses, as written by the bridge authority.
//!
//! These documents carry almost no header; the publication time and the
//! authority's fingerprint are encoded in the file name.

use std::collections::BTreeMap;

use crate::descriptor::ParseOptions;
use crate::error::DocumentParseError;
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Document, Fingerprint, RawContent, UnrecognizedLines};
use crate::netstatus::{self, EntryFlavor, NetworkStatusEntry, STATUS_SECTIONS};

//
// External dependencies
//
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FILE_NAME: Regex = Regex::new(r"^(\d{8}-\d{6})-([0-9A-Fa-f]{40})$").unwrap();
}

const FILE_NAME_PATTERN: &str = "yyyyMMdd-HHmmss-<fingerprint>";

const HEADER_RULES: Rules = Rules {
    at_most_once: &["published", "flag-thresholds", "fingerprint"],
    ..Rules::NONE
};

/// A bridge network status
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeNetworkStatus {
    /// From the `published` line if present, else from the file name
    pub published: DateTime<Utc>,
    pub authority_fingerprint: Option<Fingerprint>,
    pub flag_thresholds: BTreeMap<String, f64>,
    pub entries: BTreeMap<Fingerprint, NetworkStatusEntry>,
    pub content: RawContent,
}

/// Split a file name like `20120301-120000-4A0CCD2DDC7995083D73F5D667100C8A5831F16D`
/// into its time and fingerprint.
pub fn parse_file_name(file_name: &str) -> Result<(DateTime<Utc>, Fingerprint), DocumentParseError> {
    let invalid = || DocumentParseError::InvalidFileName {
        file_name: file_name.to_string(),
        pattern: FILE_NAME_PATTERN,
    };
    let captures = FILE_NAME.captures(file_name).ok_or_else(invalid)?;
    let time = NaiveDateTime::parse_from_str(&captures[1], "%Y%m%d-%H%M%S").map_err(|_| invalid())?;
    let fingerprint = Fingerprint::from_str_hex(&captures[2]).map_err(|_| invalid())?;
    Ok((Utc.from_utc_datetime(&time), fingerprint))
}

impl BridgeNetworkStatus {
    /// Parse a bridge network status. `file_name` is the base name of the
    /// file the bytes came from; it may be omitted or malformed only if the
    /// document has its own `published` line.
    pub fn from_bytes(
        raw: &[u8],
        file_name: Option<&str>,
        options: &ParseOptions,
    ) -> Result<Self, DocumentParseError> {
        Self::from_doc(Document::parse_single(raw)?, file_name, options)
    }

    pub(crate) fn from_doc(
        doc: Document,
        file_name: Option<&str>,
        options: &ParseOptions,
    ) -> Result<Self, DocumentParseError> {
        let from_file_name = file_name.map(parse_file_name);
        let sections = netstatus::split_sections(&doc.items, &STATUS_SECTIONS)?;
        if !sections.dir_sources.is_empty() || !sections.signatures.is_empty() {
            let item = sections
                .dir_sources
                .first()
                .or_else(|| sections.signatures.first());
            return Err(DocumentParseError::UnexpectedKeyword {
                keyword: item.map(|i| i.keyword().to_string()).unwrap_or_default(),
            });
        }
        HEADER_RULES.check_items(sections.header, doc.fragment())?;

        let mut unrecognized = UnrecognizedLines::new(options);
        let mut published = None;
        let mut authority_fingerprint = match &from_file_name {
            Some(Ok((_, fingerprint))) => Some(*fingerprint),
            _ => None,
        };
        let mut flag_thresholds = BTreeMap::new();
        for item in sections.header {
            let line = item.line();
            match item.keyword() {
                "published" => {
                    published = Some(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "flag-thresholds" => {
                    flag_thresholds = netstatus::parse_flag_thresholds(item)?;
                }
                "fingerprint" => {
                    let fingerprint = fields::parse_hex_fingerprint(item.args_exactly(1)?[0], line)?;
                    authority_fingerprint = Some(fingerprint);
                }
                _ => unrecognized.record(item)?,
            }
        }
        let published = match (published, from_file_name) {
            (Some(published), _) => published,
            (None, Some(parsed)) => parsed?.0,
            (None, None) => {
                return Err(DocumentParseError::InvalidFileName {
                    file_name: String::new(),
                    pattern: FILE_NAME_PATTERN,
                })
            }
        };

        let entries = netstatus::parse_entries(sections.entries, EntryFlavor::BridgeStatus, options)?;
        for entry in entries.values() {
            unrecognized.extend(entry.unrecognized_lines.clone());
        }
        netstatus::parse_footer(sections.footer, &mut unrecognized)?;

        Ok(BridgeNetworkStatus {
            published,
            authority_fingerprint,
            flag_thresholds,
            entries,
            content: doc.into_content(unrecognized),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE_NAME: &str = "20120301-120000-4A0CCD2DDC7995083D73F5D667100C8A5831F16D";

    const STATUS: &str = "@type bridge-network-status 1.0
flag-thresholds stable-uptime=3105080 fast-speed=55000 guard-wfu=98.000% ignoring-advertised-bws=0
r Unnamed AAoQ1DAR6kkoo19hBAX5K0QztNw ASG1ZhB4Ad0SsjTzBpA+V8+zWkQ 2012-03-01 11:20:21 10.108.126.72 443 0
a [fd9f:2e19:3bcf::02:9970]:443
s Fast Running Stable Valid
w Bandwidth=18
p reject 1-65535
r Unnamed AAvcgAIRgm4yWWG4xHtSeZmY9TY ARuaIiMaDVJ1lw4gd1WmDy6Tk0A 2012-03-01 07:34:44 10.16.0.2 9001 0
s Running Valid
w Bandwidth=1
";

    #[test]
    fn parses_file_name() {
        let (time, fingerprint) = parse_file_name(FILE_NAME).unwrap();
        assert_eq!(time, Utc.with_ymd_and_hms(2012, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(fingerprint.to_string(), "4A0CCD2DDC7995083D73F5D667100C8A5831F16D");
    }

    #[test]
    fn lowercase_file_name() {
        let (_, fingerprint) = parse_file_name("20120301-120000-4a0ccd2ddc7995083d73f5d667100c8a5831f16d").unwrap();
        assert_eq!(fingerprint.to_string(), "4A0CCD2DDC7995083D73F5D667100C8A5831F16D");
    }

    #[test]
    fn rejects_bad_file_names() {
        for name in [
            "20120301-120000",
            "2012-03-01-12-00-00",
            "20121301-120000-4A0CCD2DDC7995083D73F5D667100C8A5831F16D",
            "20120301-120000-4A0CCD2DDC7995083D73F5D667100C8A5831F1",
        ] {
            assert!(
                matches!(parse_file_name(name), Err(DocumentParseError::InvalidFileName { .. })),
                "{name}"
            );
        }
    }

    #[test]
    fn parses_status() {
        let status =
            BridgeNetworkStatus::from_bytes(STATUS.as_bytes(), Some(FILE_NAME), &ParseOptions::default()).unwrap();
        assert_eq!(status.published, Utc.with_ymd_and_hms(2012, 3, 1, 12, 0, 0).unwrap());
        assert!(status.authority_fingerprint.is_some());
        assert_eq!(status.flag_thresholds["ignoring-advertised-bws"], 0.0);
        assert_eq!(status.entries.len(), 2);
        assert_eq!(status.content.bytes(), STATUS.as_bytes());
    }

    #[test]
    fn published_line_wins() {
        let raw = STATUS.replace("flag-thresholds", "published 2012-03-01 11:59:00\nflag-thresholds");
        let status = BridgeNetworkStatus::from_bytes(raw.as_bytes(), Some(FILE_NAME), &ParseOptions::default()).unwrap();
        assert_eq!(status.published, Utc.with_ymd_and_hms(2012, 3, 1, 11, 59, 0).unwrap());

        let status = BridgeNetworkStatus::from_bytes(raw.as_bytes(), None, &ParseOptions::default()).unwrap();
        assert!(status.authority_fingerprint.is_none());
    }

    #[test]
    fn odd_file_name_with_published_line() {
        let raw = STATUS.replace("flag-thresholds", "published 2012-03-01 11:59:00\nflag-thresholds");
        let status =
            BridgeNetworkStatus::from_bytes(raw.as_bytes(), Some("bridge-statuses"), &ParseOptions::default()).unwrap();
        assert_eq!(status.published, Utc.with_ymd_and_hms(2012, 3, 1, 11, 59, 0).unwrap());
        assert!(status.authority_fingerprint.is_none());
    }

    #[test]
    fn needs_a_time() {
        assert!(BridgeNetworkStatus::from_bytes(STATUS.as_bytes(), None, &ParseOptions::default()).is_err());
        assert!(matches!(
            BridgeNetworkStatus::from_bytes(STATUS.as_bytes(), Some("bridge-statuses"), &ParseOptions::default()),
            Err(DocumentParseError::InvalidFileName { .. })
        ));
    }

    #[test]
    fn rejects_signatures() {
        let raw = format!(
            "{}directory-signature 4A0CCD2DDC7995083D73F5D667100C8A5831F16D 5AFAC3D00E97D4C6B8B4E0A5E1B0C3A4E5F6A7B8\n",
            STATUS
        );
        assert!(matches!(
            BridgeNetworkStatus::from_bytes(raw.as_bytes(), Some(FILE_NAME), &ParseOptions::default()),
            Err(DocumentParseError::UnexpectedKeyword { .. })
        ));
    }
}

//! Exit lists, recording which addresses relays were seen exiting from

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::descriptor::ParseOptions;
use crate::error::DocumentParseError;
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Document, Fingerprint, Item, RawContent, UnrecognizedLines};
use crate::netstatus;

//
// External dependencies
//
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FILE_NAME: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2}$").unwrap();
}

const FILE_NAME_PATTERN: &str = "yyyy-MM-dd-HH-mm-ss";

const HEADER_RULES: Rules = Rules {
    at_most_once: &["Downloaded"],
    ..Rules::NONE
};

const ENTRY_RULES: Rules = Rules {
    first: Some("ExitNode"),
    exactly_once: &["ExitNode", "Published", "LastStatus"],
    at_least_once: &["ExitAddress"],
    ..Rules::NONE
};

/// One relay of an exit list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitListEntry {
    pub fingerprint: Fingerprint,
    pub published: DateTime<Utc>,
    pub last_status: DateTime<Utc>,
    /// Each address with the latest time it was observed
    pub exit_addresses: BTreeMap<Ipv4Addr, DateTime<Utc>>,
    pub unrecognized_lines: Vec<String>,
}

impl ExitListEntry {
    fn from_items(items: &[Item], options: &ParseOptions) -> Result<ExitListEntry, DocumentParseError> {
        let fragment = items.first().map(|i| i.line().to_string()).unwrap_or_default();
        ENTRY_RULES.check_items(items, fragment)?;

        let mut fingerprint = None;
        let mut published = None;
        let mut last_status = None;
        let mut exit_addresses = BTreeMap::new();
        let mut unrecognized = UnrecognizedLines::new(options);
        for item in items {
            let line = item.line();
            match item.keyword() {
                "ExitNode" => {
                    fingerprint = Some(fields::parse_hex_fingerprint(item.args_exactly(1)?[0], line)?);
                }
                "Published" => {
                    published = Some(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "LastStatus" => {
                    last_status = Some(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "ExitAddress" => {
                    let args = item.args_exactly(3)?;
                    let address = fields::parse_ipv4(args[0], line)?;
                    let scanned = fields::parse_timestamp_args(args[1], args[2], line)?;
                    let seen = exit_addresses.entry(address).or_insert(scanned);
                    if *seen < scanned {
                        *seen = scanned;
                    }
                }
                _ => unrecognized.record(item)?,
            }
        }
        let missing = |keyword: &str| DocumentParseError::args_missing(keyword);
        Ok(ExitListEntry {
            fingerprint: fingerprint.ok_or_else(|| missing("ExitNode"))?,
            published: published.ok_or_else(|| missing("Published"))?,
            last_status: last_status.ok_or_else(|| missing("LastStatus"))?,
            exit_addresses,
            unrecognized_lines: unrecognized.into_lines(),
        })
    }
}

/// An exit list as published by the exit scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitList {
    pub downloaded: DateTime<Utc>,
    pub entries: BTreeMap<Fingerprint, ExitListEntry>,
    pub content: RawContent,
}

/// Read the download time from a file name like `2012-02-29-23-02-02`
pub fn parse_file_name(file_name: &str) -> Result<DateTime<Utc>, DocumentParseError> {
    let invalid = || DocumentParseError::InvalidFileName {
        file_name: file_name.to_string(),
        pattern: FILE_NAME_PATTERN,
    };
    if !FILE_NAME.is_match(file_name) {
        return Err(invalid());
    }
    let time = NaiveDateTime::parse_from_str(file_name, "%Y-%m-%d-%H-%M-%S").map_err(|_| invalid())?;
    Ok(Utc.from_utc_datetime(&time))
}

impl ExitList {
    /// Parse an exit list. The download time comes from the `Downloaded`
    /// line or, lacking one, from `file_name`.
    pub fn from_bytes(
        raw: &[u8],
        file_name: Option<&str>,
        options: &ParseOptions,
    ) -> Result<ExitList, DocumentParseError> {
        Self::from_doc(Document::parse_single(raw)?, file_name, options)
    }

    pub(crate) fn from_doc(
        doc: Document,
        file_name: Option<&str>,
        options: &ParseOptions,
    ) -> Result<ExitList, DocumentParseError> {
        let first_entry = doc
            .items
            .iter()
            .position(|i| i.keyword() == "ExitNode")
            .unwrap_or(doc.items.len());
        let (header, body) = doc.items.split_at(first_entry);
        HEADER_RULES.check_items(header, doc.fragment())?;

        let mut unrecognized = UnrecognizedLines::new(options);
        let mut downloaded = None;
        for item in header {
            match item.keyword() {
                "Downloaded" => {
                    downloaded = Some(fields::parse_timestamp(item.get_argument()?, item.line())?);
                }
                _ => unrecognized.record(item)?,
            }
        }
        let downloaded = match (downloaded, file_name) {
            (Some(downloaded), _) => downloaded,
            (None, Some(file_name)) => parse_file_name(file_name)?,
            (None, None) => {
                return Err(DocumentParseError::InvalidFileName {
                    file_name: String::new(),
                    pattern: FILE_NAME_PATTERN,
                })
            }
        };

        let mut entries = BTreeMap::new();
        for chunk in netstatus::chunks(body, "ExitNode") {
            let entry = ExitListEntry::from_items(chunk, options)?;
            unrecognized.extend(entry.unrecognized_lines.clone());
            if entries.contains_key(&entry.fingerprint) {
                return Err(DocumentParseError::DuplicateEntry {
                    key: entry.fingerprint.to_string(),
                    line: chunk[0].line().to_string(),
                });
            }
            entries.insert(entry.fingerprint, entry);
        }

        Ok(ExitList {
            downloaded,
            entries,
            content: doc.into_content(unrecognized),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXIT_LIST: &str = "@type tordnsel 1.0
Downloaded 2012-02-29 23:02:02
ExitNode 0011BD2485AD45D984EC4159C88FC066E5E3300E
Published 2012-02-29 17:06:49
LastStatus 2012-02-29 18:02:19
ExitAddress 31.172.30.2 2012-02-29 18:06:01
ExitNode 0091A4CE0B4D1B0C6AF5D48FC3AA2DC57C2D6C25
Published 2012-02-29 12:42:27
LastStatus 2012-02-29 19:03:02
ExitAddress 83.170.92.9 2012-02-29 13:06:55
ExitAddress 83.170.92.9 2012-02-29 19:06:55
ExitAddress 83.170.92.10 2012-02-29 19:06:55
";

    #[test]
    fn parses_exit_list() {
        let list = ExitList::from_bytes(EXIT_LIST.as_bytes(), None, &ParseOptions::default()).unwrap();
        assert_eq!(list.downloaded, Utc.with_ymd_and_hms(2012, 2, 29, 23, 2, 2).unwrap());
        assert_eq!(list.entries.len(), 2);
        let entry = list.entries.values().nth(1).unwrap();
        assert_eq!(entry.exit_addresses.len(), 2);
        let seen = entry.exit_addresses[&"83.170.92.9".parse::<Ipv4Addr>().unwrap()];
        assert_eq!(seen, Utc.with_ymd_and_hms(2012, 2, 29, 19, 6, 55).unwrap());
    }

    #[test]
    fn download_time_from_file_name() {
        let raw = EXIT_LIST.replace("Downloaded 2012-02-29 23:02:02\n", "");
        let list = ExitList::from_bytes(raw.as_bytes(), Some("2012-02-29-23-05-00"), &ParseOptions::default()).unwrap();
        assert_eq!(list.downloaded, Utc.with_ymd_and_hms(2012, 2, 29, 23, 5, 0).unwrap());
        assert!(ExitList::from_bytes(raw.as_bytes(), None, &ParseOptions::default()).is_err());
        assert!(matches!(
            ExitList::from_bytes(raw.as_bytes(), Some("2012-02-29"), &ParseOptions::default()),
            Err(DocumentParseError::InvalidFileName { .. })
        ));
    }

    #[test]
    fn entry_needs_an_address() {
        let raw = EXIT_LIST.replace("ExitAddress 31.172.30.2 2012-02-29 18:06:01\n", "");
        assert!(matches!(
            ExitList::from_bytes(raw.as_bytes(), None, &ParseOptions::default()),
            Err(DocumentParseError::KeywordCount { constraint: "at least once", .. })
        ));
    }

    #[test]
    fn duplicate_relay() {
        let start = EXIT_LIST.find("ExitNode 0011").unwrap();
        let end = EXIT_LIST.find("ExitNode 0091").unwrap();
        let raw = format!("{}{}", EXIT_LIST, &EXIT_LIST[start..end]);
        assert!(matches!(
            ExitList::from_bytes(raw.as_bytes(), None, &ParseOptions::default()),
            Err(DocumentParseError::DuplicateEntry { .. })
        ));
    }
}

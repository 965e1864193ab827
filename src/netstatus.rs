//! Pieces shared by all network status documents (consensuses, votes and
//! bridge network statuses): section splitting, the common header, dir
//! source entries, status entries, the footer and directory signatures.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use crate::descriptor::ParseOptions;
use crate::error::DocumentParseError;
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Fingerprint, Item, UnrecognizedLines};

mod entry;
pub use entry::{
    parse_protocols, CondensedExitPolicy, EntryFlavor, ExitPolicyEntry, ExitPolicyType, Flag,
    MicrodescDigests, NetworkStatusEntry, Protocol, SupportedProtocolVersion,
};
pub(crate) use entry::parse_entries;

//
// External dependencies
//
use chrono::{DateTime, Utc};
use derive_builder::Builder;

/// The keywords starting each section of a network status document
#[derive(Debug, Clone, Copy)]
pub(crate) struct SectionKeywords {
    pub dir_source: Option<&'static str>,
    pub entry: &'static str,
    pub footer: Option<&'static str>,
    pub signature: Option<&'static str>,
}

pub(crate) const STATUS_SECTIONS: SectionKeywords = SectionKeywords {
    dir_source: Some("dir-source"),
    entry: "r",
    footer: Some("directory-footer"),
    signature: Some("directory-signature"),
};

/// A network status document's items, cut into its sections
#[derive(Debug)]
pub(crate) struct Sections<'d, 'a> {
    pub header: &'d [Item<'a>],
    pub dir_sources: &'d [Item<'a>],
    pub entries: &'d [Item<'a>],
    pub footer: &'d [Item<'a>],
    pub signatures: &'d [Item<'a>],
}

/// Cut `items` into header, dir sources, entries, footer and signatures.
///
/// Sections may be empty but must appear in this order; a section keyword
/// showing up after a later section has started is an error.
pub(crate) fn split_sections<'d, 'a>(
    items: &'d [Item<'a>],
    keywords: &SectionKeywords,
) -> Result<Sections<'d, 'a>, DocumentParseError> {
    // start index of sections 1..=4; section 0 (header) starts at 0
    let mut starts = [items.len(); 5];
    starts[0] = 0;
    let mut current = 0;
    for (i, item) in items.iter().enumerate() {
        let keyword = item.keyword();
        let section = if Some(keyword) == keywords.dir_source {
            1
        } else if keyword == keywords.entry {
            2
        } else if Some(keyword) == keywords.footer {
            3
        } else if Some(keyword) == keywords.signature {
            4
        } else {
            continue;
        };
        if section < current {
            return Err(DocumentParseError::UnexpectedKeyword {
                keyword: keyword.to_string(),
            });
        }
        if section > current {
            for start in starts.iter_mut().take(section + 1).skip(current + 1) {
                *start = i;
            }
            current = section;
        }
    }
    Ok(Sections {
        header: &items[starts[0]..starts[1]],
        dir_sources: &items[starts[1]..starts[2]],
        entries: &items[starts[2]..starts[3]],
        footer: &items[starts[3]..starts[4]],
        signatures: &items[starts[4]..],
    })
}

/// Split `items` at every item with the given keyword
pub(crate) fn chunks<'d, 'a>(items: &'d [Item<'a>], keyword: &str) -> Vec<&'d [Item<'a>]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for (i, item) in items.iter().enumerate().skip(1) {
        if item.keyword() == keyword {
            chunks.push(&items[start..i]);
            start = i;
        }
    }
    if !items.is_empty() {
        chunks.push(&items[start..]);
    }
    chunks
}

/// A shared random value with the number of reveals it was computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedRandValue {
    pub num_reveals: u32,
    pub value: String,
}

impl SharedRandValue {
    pub(crate) fn parse(item: &Item) -> Result<SharedRandValue, DocumentParseError> {
        let line = item.line();
        let args = item.args_exactly(2)?;
        Ok(SharedRandValue {
            num_reveals: fields::parse_int(args[0], line)?,
            value: fields::parse_base64(args[1], line)?,
        })
    }
}

/// Header fields common to consensuses and votes
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(private)]
pub struct StatusHeader {
    pub network_status_version: u32,
    /// `microdesc` for microdescriptor consensuses
    #[builder(default)]
    pub flavor: Option<String>,
    pub vote_status: String,
    pub valid_after: DateTime<Utc>,
    pub fresh_until: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub vote_seconds: i64,
    pub dist_seconds: i64,
    #[builder(default)]
    pub client_versions: Vec<String>,
    #[builder(default)]
    pub server_versions: Vec<String>,
    pub known_flags: BTreeSet<String>,
    #[builder(default)]
    pub recommended_client_protocols: BTreeMap<Protocol, SupportedProtocolVersion>,
    #[builder(default)]
    pub recommended_relay_protocols: BTreeMap<Protocol, SupportedProtocolVersion>,
    #[builder(default)]
    pub required_client_protocols: BTreeMap<Protocol, SupportedProtocolVersion>,
    #[builder(default)]
    pub required_relay_protocols: BTreeMap<Protocol, SupportedProtocolVersion>,
    #[builder(default)]
    pub params: BTreeMap<String, i64>,
    #[builder(default)]
    pub shared_rand_previous_value: Option<SharedRandValue>,
    #[builder(default)]
    pub shared_rand_current_value: Option<SharedRandValue>,
    #[builder(default)]
    pub packages: Vec<String>,
}

fn parse_versions(item: &Item) -> Vec<String> {
    item.arguments()
        .map(|a| a.split(',').filter(|v| !v.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

impl StatusHeader {
    /// Decode the header items, passing items this function does not know
    /// to `extra`. `extra` returns whether it consumed the item; items
    /// neither side knows end up as unrecognized lines.
    pub(crate) fn parse<F>(
        items: &[Item],
        unrecognized: &mut UnrecognizedLines,
        mut extra: F,
    ) -> Result<StatusHeader, DocumentParseError>
    where
        F: FnMut(&Item) -> Result<bool, DocumentParseError>,
    {
        let mut header = StatusHeaderBuilder::default();
        for item in items.iter() {
            let line = item.line();
            match item.keyword() {
                "network-status-version" => {
                    let args = item.args_at_least(1)?;
                    let version: u32 = fields::parse_int(args[0], line)?;
                    if version != 3 || args.len() > 2 {
                        return Err(DocumentParseError::illegal(line, "unsupported network status version"));
                    }
                    header.network_status_version(version);
                    header.flavor(args.get(1).map(|f| f.to_string()));
                }
                "vote-status" => {
                    header.vote_status(item.args_exactly(1)?[0].to_string());
                }
                "valid-after" => {
                    header.valid_after(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "fresh-until" => {
                    header.fresh_until(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "valid-until" => {
                    header.valid_until(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "voting-delay" => {
                    let args = item.args_exactly(2)?;
                    header.vote_seconds(fields::parse_int(args[0], line)?);
                    header.dist_seconds(fields::parse_int(args[1], line)?);
                }
                "client-versions" => {
                    header.client_versions(parse_versions(item));
                }
                "server-versions" => {
                    header.server_versions(parse_versions(item));
                }
                "known-flags" => {
                    header.known_flags(item.args().into_iter().map(str::to_string).collect());
                }
                "recommended-client-protocols" => {
                    header.recommended_client_protocols(parse_protocols(&item.args(), line)?);
                }
                "recommended-relay-protocols" => {
                    header.recommended_relay_protocols(parse_protocols(&item.args(), line)?);
                }
                "required-client-protocols" => {
                    header.required_client_protocols(parse_protocols(&item.args(), line)?);
                }
                "required-relay-protocols" => {
                    header.required_relay_protocols(parse_protocols(&item.args(), line)?);
                }
                "params" => {
                    header.params(fields::parse_key_ints(&item.args(), line)?);
                }
                "shared-rand-previous-value" => {
                    header.shared_rand_previous_value(Some(SharedRandValue::parse(item)?));
                }
                "shared-rand-current-value" => {
                    header.shared_rand_current_value(Some(SharedRandValue::parse(item)?));
                }
                "package" => {
                    let package = item.args_at_least(4)?.join(" ");
                    header.packages.get_or_insert_with(Vec::new).push(package);
                }
                _ => {
                    if !extra(item)? {
                        unrecognized.record(item)?;
                    }
                }
            }
        }
        header
            .build()
            .map_err(|err| DocumentParseError::Incomplete(Box::new(err)))
    }
}

/// An authority listed in a consensus (or the one authority of a vote)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirSourceEntry {
    pub nickname: String,
    pub identity: Fingerprint,
    pub hostname: String,
    pub ip: Ipv4Addr,
    pub dir_port: u16,
    pub or_port: u16,
    /// Entries for an authority's legacy key carry a `-legacy` nickname
    /// suffix and neither contact nor vote digest.
    pub is_legacy: bool,
    pub contact: Option<String>,
    pub vote_digest: Option<String>,
    pub unrecognized_lines: Vec<String>,
}

const DIR_SOURCE_RULES: Rules = Rules {
    first: Some("dir-source"),
    exactly_once: &["dir-source", "contact", "vote-digest"],
    ..Rules::NONE
};

const LEGACY_DIR_SOURCE_RULES: Rules = Rules {
    first: Some("dir-source"),
    exactly_once: &["dir-source"],
    at_most_once: &["contact", "vote-digest"],
    ..Rules::NONE
};

impl DirSourceEntry {
    /// Parse the `dir-source` line alone
    pub(crate) fn from_line(item: &Item) -> Result<DirSourceEntry, DocumentParseError> {
        let line = item.line();
        let args = item.args_exactly(6)?;
        let (nickname, is_legacy) = match args[0].strip_suffix("-legacy") {
            Some(base) => (base, true),
            None => (args[0], false),
        };
        fields::parse_nickname(nickname, line)?;
        Ok(DirSourceEntry {
            nickname: args[0].to_string(),
            identity: fields::parse_hex_fingerprint(args[1], line)?,
            hostname: args[2].to_string(),
            ip: fields::parse_ipv4(args[3], line)?,
            dir_port: fields::parse_port(args[4], line)?,
            or_port: fields::parse_port(args[5], line)?,
            is_legacy,
            contact: None,
            vote_digest: None,
            unrecognized_lines: Vec::new(),
        })
    }

    /// Decode a consensus dir source section starting with `dir-source`
    pub(crate) fn from_items(
        items: &[Item],
        options: &ParseOptions,
    ) -> Result<DirSourceEntry, DocumentParseError> {
        let first = items
            .first()
            .ok_or(DocumentParseError::EmptyDocument)?;
        let mut entry = DirSourceEntry::from_line(first)?;
        let rules = if entry.is_legacy {
            LEGACY_DIR_SOURCE_RULES
        } else {
            DIR_SOURCE_RULES
        };
        rules.check_items(items, first.line().to_string())?;

        let mut unrecognized = UnrecognizedLines::new(options);
        for item in items.iter().skip(1) {
            match item.keyword() {
                "contact" => {
                    entry.contact = Some(item.arguments().unwrap_or("").to_string());
                }
                "vote-digest" => {
                    let digest = item.args_exactly(1)?[0];
                    entry.vote_digest = Some(fields::parse_hex_digest(digest, item.line())?);
                }
                _ => unrecognized.record(item)?,
            }
        }
        entry.unrecognized_lines = unrecognized.into_lines();
        Ok(entry)
    }
}

/// Decode all dir source sections of a consensus, keyed by identity
pub(crate) fn parse_dir_sources(
    items: &[Item],
    options: &ParseOptions,
) -> Result<BTreeMap<Fingerprint, DirSourceEntry>, DocumentParseError> {
    let mut dir_sources = BTreeMap::new();
    for chunk in chunks(items, "dir-source") {
        let entry = DirSourceEntry::from_items(chunk, options)?;
        if dir_sources.contains_key(&entry.identity) {
            return Err(DocumentParseError::DuplicateEntry {
                key: entry.identity.to_string(),
                line: chunk[0].line().to_string(),
            });
        }
        dir_sources.insert(entry.identity, entry);
    }
    Ok(dir_sources)
}

/// A signature on a consensus or vote
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirectorySignature {
    pub identity: Fingerprint,
    /// `sha1` unless stated otherwise
    pub algorithm: String,
    pub signing_key_digest: String,
    pub signature: String,
}

impl DirectorySignature {
    pub(crate) fn from_item(item: &Item) -> Result<DirectorySignature, DocumentParseError> {
        let line = item.line();
        let args = item.split_arguments()?;
        let (algorithm, identity, signing_key_digest) = match args[..] {
            [identity, digest] => ("sha1", identity, digest),
            [algorithm, identity, digest] => (algorithm, identity, digest),
            _ => return Err(DocumentParseError::illegal(line, "expected 2 or 3 arguments")),
        };
        Ok(DirectorySignature {
            identity: fields::parse_hex_fingerprint(identity, line)?,
            algorithm: algorithm.to_string(),
            signing_key_digest: fields::parse_hex_digest(signing_key_digest, line)?,
            signature: item.object_labeled("SIGNATURE")?.text.clone(),
        })
    }
}

/// Decode the signature section; sorted by identity and algorithm
pub(crate) fn parse_signatures(
    items: &[Item],
    unrecognized: &mut UnrecognizedLines,
) -> Result<Vec<DirectorySignature>, DocumentParseError> {
    let mut signatures: Vec<DirectorySignature> = Vec::new();
    for item in items {
        match item.keyword() {
            "directory-signature" => {
                let signature = DirectorySignature::from_item(item)?;
                if signatures
                    .iter()
                    .any(|s| s.identity == signature.identity && s.algorithm == signature.algorithm)
                {
                    return Err(DocumentParseError::DuplicateEntry {
                        key: signature.identity.to_string(),
                        line: item.line().to_string(),
                    });
                }
                signatures.push(signature);
            }
            _ => unrecognized.record(item)?,
        }
    }
    signatures.sort();
    Ok(signatures)
}

/// Parse a `flag-thresholds` line; percentages become fractions
pub(crate) fn parse_flag_thresholds(item: &Item) -> Result<BTreeMap<String, f64>, DocumentParseError> {
    let line = item.line();
    fields::parse_key_values(&item.args(), line)?
        .into_iter()
        .map(|(k, v)| {
            let value = if v.ends_with('%') {
                fields::parse_percentage(&v, line)?
            } else {
                fields::parse_decimal(&v, line)?
            };
            Ok((k, value))
        })
        .collect()
}

const FOOTER_RULES: Rules = Rules {
    first: Some("directory-footer"),
    exactly_once: &["directory-footer"],
    at_most_once: &["bandwidth-weights"],
    ..Rules::NONE
};

/// Decode the footer section, returning the bandwidth weights if any
pub(crate) fn parse_footer(
    items: &[Item],
    unrecognized: &mut UnrecognizedLines,
) -> Result<BTreeMap<String, i64>, DocumentParseError> {
    let mut weights = BTreeMap::new();
    if items.is_empty() {
        return Ok(weights);
    }
    FOOTER_RULES.check_items(items, items[0].line().to_string())?;
    for item in items {
        match item.keyword() {
            "directory-footer" => item.no_arguments()?,
            "bandwidth-weights" => {
                weights = fields::parse_key_ints(&item.args(), item.line())?;
            }
            _ => unrecognized.record(item)?,
        }
    }
    Ok(weights)
}

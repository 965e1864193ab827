//! The descriptor tagged union and detecting which decoder a blob needs

use std::ops::Range;

use crate::bridgepool::{self, BridgePoolAssignment};
use crate::bridgestatus::BridgeNetworkStatus;
use crate::certificate::{self, DirectoryKeyCertificate};
use crate::consensus::NetworkStatusConsensus;
use crate::error::{DocumentParseError, UnparseableDocument};
use crate::exitlist::ExitList;
use crate::extrainfo::{self, ExtraInfoDescriptor};
use crate::gettor::GettorStatistics;
use crate::meta::{self, Document, RawContent};
use crate::microdesc::{self, Microdescriptor};
use crate::server::{self, Publisher, ServerDescriptor};
use crate::split;
use crate::torperf::TorperfResult;
use crate::vote::NetworkStatusVote;

//
// External dependencies
//
use derive_builder::Builder;
use lazy_static::lazy_static;
use phf::phf_map;
use regex::Regex;
use strum::{EnumIter, IntoStaticStr};

/// How lenient decoders are
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
#[builder(default)]
pub struct ParseOptions {
    /// Fail on lines with unknown keywords instead of keeping them as
    /// unrecognized lines
    pub fail_on_unrecognized: bool,
}

impl ParseOptions {
    /// Options that reject any line a decoder does not know
    pub fn strict() -> ParseOptions {
        ParseOptions {
            fail_on_unrecognized: true,
        }
    }
}

/// The kinds of documents this crate decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum DescriptorKind {
    NetworkStatusConsensus,
    NetworkStatusVote,
    BridgeNetworkStatus,
    RelayServerDescriptor,
    BridgeServerDescriptor,
    RelayExtraInfoDescriptor,
    BridgeExtraInfoDescriptor,
    Microdescriptor,
    DirectoryKeyCertificate,
    ExitList,
    BridgePoolAssignment,
    GettorStatistics,
    TorperfResult,
}

/// `@type` annotation names, without their version
static TYPE_ANNOTATIONS: phf::Map<&'static str, DescriptorKind> = phf_map! {
    "network-status-consensus-3" => DescriptorKind::NetworkStatusConsensus,
    "network-status-microdesc-consensus-3" => DescriptorKind::NetworkStatusConsensus,
    "network-status-vote-3" => DescriptorKind::NetworkStatusVote,
    "bridge-network-status" => DescriptorKind::BridgeNetworkStatus,
    "server-descriptor" => DescriptorKind::RelayServerDescriptor,
    "bridge-server-descriptor" => DescriptorKind::BridgeServerDescriptor,
    "extra-info" => DescriptorKind::RelayExtraInfoDescriptor,
    "bridge-extra-info" => DescriptorKind::BridgeExtraInfoDescriptor,
    "microdescriptor" => DescriptorKind::Microdescriptor,
    "dir-key-certificate-3" => DescriptorKind::DirectoryKeyCertificate,
    "tordnsel" => DescriptorKind::ExitList,
    "bridge-pool-assignment" => DescriptorKind::BridgePoolAssignment,
    "gettor" => DescriptorKind::GettorStatistics,
    "torperf" => DescriptorKind::TorperfResult,
};

lazy_static! {
    static ref TYPE_ANNOTATION: Regex = Regex::new(r"^@type ([a-z0-9-]+) \d+\.\d+$").unwrap();
    static ref DATE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    static ref TORPERF_PAIR: Regex = Regex::new(r"^[A-Z][A-Z0-9_]*=").unwrap();
}

impl DescriptorKind {
    /// Detect the kind of the documents in `raw` from its first `@type`
    /// annotation or, lacking one, from its first keyword
    pub fn detect(raw: &[u8]) -> Option<DescriptorKind> {
        let (annotations, body_offset) = meta::split_annotations(raw);
        for annotation in annotations.iter() {
            if let Some(captures) = TYPE_ANNOTATION.captures(annotation) {
                if let Some(kind) = TYPE_ANNOTATIONS.get(&captures[1]) {
                    return Some(*kind);
                }
            }
        }

        let body = &raw[body_offset..];
        let contains = |needle: &[u8]| memchr::memmem::find(body, needle).is_some();
        let first_line = meta::fragment(body);
        let keyword = first_line.split([' ', '\t']).next().unwrap_or_default();
        let keyword = match keyword {
            "opt" => first_line.split([' ', '\t']).nth(1).unwrap_or_default(),
            other => other,
        };
        let kind = match keyword {
            "network-status-version" if contains(b"\nvote-status vote") => DescriptorKind::NetworkStatusVote,
            "network-status-version" => DescriptorKind::NetworkStatusConsensus,
            "router" if contains(b"\nrouter-digest ") => DescriptorKind::BridgeServerDescriptor,
            "router" => DescriptorKind::RelayServerDescriptor,
            "extra-info" if contains(b"\nrouter-digest ") => DescriptorKind::BridgeExtraInfoDescriptor,
            "extra-info" => DescriptorKind::RelayExtraInfoDescriptor,
            "onion-key" => DescriptorKind::Microdescriptor,
            "dir-key-certificate-version" => DescriptorKind::DirectoryKeyCertificate,
            "Downloaded" | "ExitNode" => DescriptorKind::ExitList,
            "bridge-pool-assignment" => DescriptorKind::BridgePoolAssignment,
            "published" | "flag-thresholds" | "fingerprint" | "r" => DescriptorKind::BridgeNetworkStatus,
            date if DATE.is_match(date) => DescriptorKind::GettorStatistics,
            pair if TORPERF_PAIR.is_match(pair) => DescriptorKind::TorperfResult,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Access to the parts every descriptor keeps of its input
pub trait TorDocument {
    fn content(&self) -> &RawContent;

    /// The exact input bytes, annotations included
    fn raw_bytes(&self) -> &[u8] {
        self.content().bytes()
    }

    fn annotations(&self) -> &[String] {
        self.content().annotations()
    }

    /// Lines with unknown keywords; empty when parsing strictly
    fn unrecognized_lines(&self) -> &[String] {
        self.content().unrecognized_lines()
    }
}

macro_rules! impl_tor_document {
    ($($t:ty),*) => {
        $(
            impl TorDocument for $t {
                fn content(&self) -> &RawContent {
                    &self.content
                }
            }
        )*
    };
}

impl_tor_document!(
    NetworkStatusConsensus,
    NetworkStatusVote,
    BridgeNetworkStatus,
    ServerDescriptor,
    ExtraInfoDescriptor,
    Microdescriptor,
    DirectoryKeyCertificate,
    ExitList,
    BridgePoolAssignment,
    GettorStatistics,
    TorperfResult
);

/// Any parsed document
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    NetworkStatusConsensus(NetworkStatusConsensus),
    NetworkStatusVote(NetworkStatusVote),
    BridgeNetworkStatus(BridgeNetworkStatus),
    RelayServerDescriptor(ServerDescriptor),
    BridgeServerDescriptor(ServerDescriptor),
    RelayExtraInfoDescriptor(ExtraInfoDescriptor),
    BridgeExtraInfoDescriptor(ExtraInfoDescriptor),
    Microdescriptor(Microdescriptor),
    DirectoryKeyCertificate(DirectoryKeyCertificate),
    ExitList(ExitList),
    BridgePoolAssignment(BridgePoolAssignment),
    GettorStatistics(GettorStatistics),
    TorperfResult(TorperfResult),
}

impl Descriptor {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptor::NetworkStatusConsensus(_) => DescriptorKind::NetworkStatusConsensus,
            Descriptor::NetworkStatusVote(_) => DescriptorKind::NetworkStatusVote,
            Descriptor::BridgeNetworkStatus(_) => DescriptorKind::BridgeNetworkStatus,
            Descriptor::RelayServerDescriptor(_) => DescriptorKind::RelayServerDescriptor,
            Descriptor::BridgeServerDescriptor(_) => DescriptorKind::BridgeServerDescriptor,
            Descriptor::RelayExtraInfoDescriptor(_) => DescriptorKind::RelayExtraInfoDescriptor,
            Descriptor::BridgeExtraInfoDescriptor(_) => DescriptorKind::BridgeExtraInfoDescriptor,
            Descriptor::Microdescriptor(_) => DescriptorKind::Microdescriptor,
            Descriptor::DirectoryKeyCertificate(_) => DescriptorKind::DirectoryKeyCertificate,
            Descriptor::ExitList(_) => DescriptorKind::ExitList,
            Descriptor::BridgePoolAssignment(_) => DescriptorKind::BridgePoolAssignment,
            Descriptor::GettorStatistics(_) => DescriptorKind::GettorStatistics,
            Descriptor::TorperfResult(_) => DescriptorKind::TorperfResult,
        }
    }

    fn inner(&self) -> &dyn TorDocument {
        match self {
            Descriptor::NetworkStatusConsensus(d) => d,
            Descriptor::NetworkStatusVote(d) => d,
            Descriptor::BridgeNetworkStatus(d) => d,
            Descriptor::RelayServerDescriptor(d) | Descriptor::BridgeServerDescriptor(d) => d,
            Descriptor::RelayExtraInfoDescriptor(d) | Descriptor::BridgeExtraInfoDescriptor(d) => d,
            Descriptor::Microdescriptor(d) => d,
            Descriptor::DirectoryKeyCertificate(d) => d,
            Descriptor::ExitList(d) => d,
            Descriptor::BridgePoolAssignment(d) => d,
            Descriptor::GettorStatistics(d) => d,
            Descriptor::TorperfResult(d) => d,
        }
    }

    /// Decode one document of a known kind
    fn decode(
        kind: DescriptorKind,
        raw: &[u8],
        file_name: Option<&str>,
        options: &ParseOptions,
    ) -> Result<Descriptor, DocumentParseError> {
        let doc = || Document::parse_single(raw);
        let descriptor = match kind {
            DescriptorKind::NetworkStatusConsensus => {
                Descriptor::NetworkStatusConsensus(NetworkStatusConsensus::from_doc(doc()?, options)?)
            }
            DescriptorKind::NetworkStatusVote => {
                Descriptor::NetworkStatusVote(NetworkStatusVote::from_doc(doc()?, options)?)
            }
            DescriptorKind::BridgeNetworkStatus => {
                Descriptor::BridgeNetworkStatus(BridgeNetworkStatus::from_doc(doc()?, file_name, options)?)
            }
            DescriptorKind::RelayServerDescriptor | DescriptorKind::BridgeServerDescriptor => {
                let doc = doc()?;
                match server::detect_publisher(&doc) {
                    Publisher::Relay => Descriptor::RelayServerDescriptor(ServerDescriptor::from_doc(
                        doc,
                        Publisher::Relay,
                        options,
                    )?),
                    Publisher::Bridge => Descriptor::BridgeServerDescriptor(ServerDescriptor::from_doc(
                        doc,
                        Publisher::Bridge,
                        options,
                    )?),
                }
            }
            DescriptorKind::RelayExtraInfoDescriptor | DescriptorKind::BridgeExtraInfoDescriptor => {
                let doc = doc()?;
                match extrainfo::detect_publisher(&doc) {
                    Publisher::Relay => Descriptor::RelayExtraInfoDescriptor(ExtraInfoDescriptor::from_doc(
                        doc,
                        Publisher::Relay,
                        options,
                    )?),
                    Publisher::Bridge => Descriptor::BridgeExtraInfoDescriptor(ExtraInfoDescriptor::from_doc(
                        doc,
                        Publisher::Bridge,
                        options,
                    )?),
                }
            }
            DescriptorKind::Microdescriptor => Descriptor::Microdescriptor(Microdescriptor::from_doc(doc()?, options)?),
            DescriptorKind::DirectoryKeyCertificate => {
                Descriptor::DirectoryKeyCertificate(DirectoryKeyCertificate::from_doc(doc()?, options)?)
            }
            DescriptorKind::ExitList => Descriptor::ExitList(ExitList::from_doc(doc()?, file_name, options)?),
            DescriptorKind::BridgePoolAssignment => {
                Descriptor::BridgePoolAssignment(BridgePoolAssignment::from_doc(doc()?, options)?)
            }
            // One line each, not keyword documents
            DescriptorKind::GettorStatistics => {
                Descriptor::GettorStatistics(GettorStatistics::from_bytes(raw, options)?)
            }
            DescriptorKind::TorperfResult => Descriptor::TorperfResult(TorperfResult::from_bytes(raw, options)?),
        };
        Ok(descriptor)
    }
}

impl TorDocument for Descriptor {
    fn content(&self) -> &RawContent {
        self.inner().content()
    }
}

/// Cut `raw` into the byte ranges of its documents
fn document_ranges(kind: DescriptorKind, raw: &[u8]) -> Vec<Range<usize>> {
    let start_keyword = match kind {
        DescriptorKind::NetworkStatusConsensus | DescriptorKind::NetworkStatusVote => "network-status-version ",
        DescriptorKind::RelayServerDescriptor | DescriptorKind::BridgeServerDescriptor => server::START_KEYWORD,
        DescriptorKind::RelayExtraInfoDescriptor | DescriptorKind::BridgeExtraInfoDescriptor => {
            extrainfo::START_KEYWORD
        }
        DescriptorKind::Microdescriptor => microdesc::START_KEYWORD,
        DescriptorKind::DirectoryKeyCertificate => certificate::START_KEYWORD,
        DescriptorKind::BridgePoolAssignment => bridgepool::START_KEYWORD,
        DescriptorKind::GettorStatistics | DescriptorKind::TorperfResult => return split::split_lines(raw),
        DescriptorKind::BridgeNetworkStatus | DescriptorKind::ExitList => return vec![0..raw.len()],
    };
    let ranges = split::split_documents(raw, start_keyword);
    if ranges.is_empty() && !raw.iter().all(u8::is_ascii_whitespace) {
        // Content without any start keyword still has to fail decoding
        return vec![0..raw.len()];
    }
    ranges
}

/// Parse all documents contained in `raw`, which come from the file named
/// `file_name` (some formats take their timestamp from there).
///
/// The kind is detected once for the whole input. The first document that
/// fails aborts parsing; its bytes are returned with the error.
pub fn parse_descriptors(
    raw: &[u8],
    file_name: Option<&str>,
    options: &ParseOptions,
) -> Result<Vec<Descriptor>, UnparseableDocument> {
    let kind = DescriptorKind::detect(raw).ok_or_else(|| {
        let (_, body_offset) = meta::split_annotations(raw);
        let error = DocumentParseError::UnknownDescriptorType {
            first_line: meta::fragment(&raw[body_offset..]),
        };
        UnparseableDocument::new(raw, error)
    })?;
    parse_descriptors_as(kind, raw, file_name, options)
}

/// Parse all documents contained in `raw` as documents of `kind`
pub fn parse_descriptors_as(
    kind: DescriptorKind,
    raw: &[u8],
    file_name: Option<&str>,
    options: &ParseOptions,
) -> Result<Vec<Descriptor>, UnparseableDocument> {
    document_ranges(kind, raw)
        .into_iter()
        .map(|range| {
            let bytes = &raw[range];
            Descriptor::decode(kind, bytes, file_name, options).map_err(|e| UnparseableDocument::new(bytes, e))
        })
        .collect()
}

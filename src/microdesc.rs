//! Microdescriptors, the compact relay descriptors clients download

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::descriptor::ParseOptions;
use crate::digest::{self, DigestAlgorithm, DigestEncoding, DigestSpec};
use crate::error::DocumentParseError;
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Document, RawContent, UnrecognizedLines};
use crate::netstatus::CondensedExitPolicy;

pub(crate) const START_KEYWORD: &str = "onion-key\n";

const RULES: Rules = Rules {
    first: Some("onion-key"),
    exactly_once: &["onion-key"],
    at_most_once: &["ntor-onion-key", "family", "p", "p6"],
    ..Rules::NONE
};

const DIGEST: DigestSpec = DigestSpec {
    start: "onion-key",
    end: None,
    algorithm: DigestAlgorithm::Sha256,
    encoding: DigestEncoding::Base64,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Microdescriptor {
    /// Absent in microdescriptors of relays that dropped the TAP key
    pub onion_key: Option<String>,
    pub ntor_onion_key: Option<String>,
    pub or_addresses: Vec<(IpAddr, u16)>,
    pub family: Vec<String>,
    pub ipv4_policy: Option<CondensedExitPolicy>,
    pub ipv6_policy: Option<CondensedExitPolicy>,
    /// Identity keys by type, e.g. `ed25519`
    pub identities: BTreeMap<String, String>,
    /// SHA-256 over the whole document, as referenced from consensuses
    pub digest_sha256: String,
    pub content: RawContent,
}

impl Microdescriptor {
    pub fn from_bytes(raw: &[u8], options: &ParseOptions) -> Result<Self, DocumentParseError> {
        Self::from_doc(Document::parse_single(raw)?, options)
    }

    /// Parse a file of concatenated microdescriptors
    pub fn parse_all(raw: &[u8], options: &ParseOptions) -> Result<Vec<Self>, DocumentParseError> {
        Document::parse_many(raw, START_KEYWORD)?
            .into_iter()
            .map(|doc| Self::from_doc(doc, options))
            .collect()
    }

    pub(crate) fn from_doc(doc: Document, options: &ParseOptions) -> Result<Self, DocumentParseError> {
        RULES.check_items(&doc.items, doc.fragment())?;

        let mut unrecognized = UnrecognizedLines::new(options);
        let mut desc = Microdescriptor {
            onion_key: None,
            ntor_onion_key: None,
            or_addresses: Vec::new(),
            family: Vec::new(),
            ipv4_policy: None,
            ipv6_policy: None,
            identities: BTreeMap::new(),
            digest_sha256: String::new(),
            content: RawContent::default(),
        };
        for item in doc.items.iter() {
            let line = item.line();
            match item.keyword() {
                "onion-key" => {
                    item.no_arguments()?;
                    if item.object.is_some() {
                        desc.onion_key = Some(item.object_labeled("RSA PUBLIC KEY")?.text.clone());
                    }
                }
                "ntor-onion-key" => {
                    desc.ntor_onion_key = Some(fields::parse_base64(item.args_exactly(1)?[0], line)?);
                }
                "a" => {
                    desc.or_addresses
                        .push(fields::parse_address_port(item.args_exactly(1)?[0], line)?);
                }
                "family" => {
                    desc.family = item.args().into_iter().map(str::to_string).collect();
                }
                "p" | "p6" => {
                    let policy = item
                        .get_argument()?
                        .parse::<CondensedExitPolicy>()
                        .map_err(|_| DocumentParseError::PolicyParseError(line.to_string()))?;
                    if item.keyword() == "p" {
                        desc.ipv4_policy = Some(policy);
                    } else {
                        desc.ipv6_policy = Some(policy);
                    }
                }
                "id" => {
                    let args = item.args_exactly(2)?;
                    let key = fields::parse_base64(args[1], line)?;
                    if desc.identities.insert(args[0].to_string(), key).is_some() {
                        return Err(DocumentParseError::DuplicateEntry {
                            key: args[0].to_string(),
                            line: line.to_string(),
                        });
                    }
                }
                _ => unrecognized.record(item)?,
            }
        }
        desc.digest_sha256 = digest::compute(doc.raw(), &DIGEST)?;
        desc.content = doc.into_content(unrecognized);
        Ok(desc)
    }
}

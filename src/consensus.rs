//! Tor consensus documents

use std::collections::BTreeMap;

use crate::descriptor::ParseOptions;
use crate::digest::{self, DigestAlgorithm, DigestEncoding, DigestSpec};
use crate::error::DocumentParseError;
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Document, Fingerprint, RawContent, UnrecognizedLines};
use crate::netstatus::{
    self, DirSourceEntry, DirectorySignature, EntryFlavor, NetworkStatusEntry, StatusHeader,
    STATUS_SECTIONS,
};

//
// External dependencies
//
use chrono::{DateTime, Utc};

const HEADER_RULES: Rules = Rules {
    first: Some("network-status-version"),
    exactly_once: &[
        "network-status-version",
        "vote-status",
        "valid-after",
        "fresh-until",
        "valid-until",
        "voting-delay",
        "known-flags",
    ],
    at_most_once: &[
        "consensus-method",
        "client-versions",
        "server-versions",
        "recommended-client-protocols",
        "recommended-relay-protocols",
        "required-client-protocols",
        "required-relay-protocols",
        "params",
        "shared-rand-previous-value",
        "shared-rand-current-value",
    ],
    ..Rules::NONE
};

const SIGNATURE_RULES: Rules = Rules {
    at_least_once: &["directory-signature"],
    ..Rules::NONE
};

const DIGEST: DigestSpec = DigestSpec {
    start: "network-status-version ",
    end: Some("\ndirectory-signature "),
    algorithm: DigestAlgorithm::Sha256,
    encoding: DigestEncoding::HexUpper,
};

/// A parsed consensus document ("network status"), in either the full or
/// the microdescriptor flavor.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStatusConsensus {
    pub header: StatusHeader,
    /// Defaults to 1 for consensuses predating the `consensus-method` line
    pub consensus_method: u32,
    pub dir_sources: BTreeMap<Fingerprint, DirSourceEntry>,
    pub entries: BTreeMap<Fingerprint, NetworkStatusEntry>,
    pub bandwidth_weights: BTreeMap<String, i64>,
    pub signatures: Vec<DirectorySignature>,
    /// SHA-256 over `network-status-version` through `directory-signature `
    pub digest_sha256: String,
    pub content: RawContent,
}

impl NetworkStatusConsensus {
    /// Parse a consensus document from raw bytes.
    pub fn from_bytes(
        raw: &[u8],
        options: &ParseOptions,
    ) -> Result<NetworkStatusConsensus, DocumentParseError> {
        let doc = Document::parse_single(raw)?;
        Self::from_doc(doc, options)
    }

    /// Parse a consensus document from an already-parsed Tor meta document
    pub(crate) fn from_doc(
        doc: Document,
        options: &ParseOptions,
    ) -> Result<NetworkStatusConsensus, DocumentParseError> {
        let sections = netstatus::split_sections(&doc.items, &STATUS_SECTIONS)?;
        HEADER_RULES.check_items(sections.header, doc.fragment())?;
        SIGNATURE_RULES.check_items(sections.signatures, doc.fragment())?;

        let mut unrecognized = UnrecognizedLines::new(options);
        let mut consensus_method = 1;
        let header = StatusHeader::parse(sections.header, &mut unrecognized, |item| {
            match item.keyword() {
                "consensus-method" => {
                    consensus_method = fields::parse_int(item.args_exactly(1)?[0], item.line())?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })?;
        if header.vote_status != "consensus" {
            return Err(DocumentParseError::illegal(
                format!("vote-status {}", header.vote_status),
                "expected consensus",
            ));
        }
        let flavor = match header.flavor.as_deref() {
            None | Some("ns") => EntryFlavor::Consensus,
            Some("microdesc") => EntryFlavor::MicrodescConsensus,
            Some(other) => {
                return Err(DocumentParseError::illegal(
                    format!("network-status-version 3 {}", other),
                    "unknown consensus flavor",
                ))
            }
        };

        let dir_sources = netstatus::parse_dir_sources(sections.dir_sources, options)?;
        let entries = netstatus::parse_entries(sections.entries, flavor, options)?;
        let bandwidth_weights = netstatus::parse_footer(sections.footer, &mut unrecognized)?;
        let signatures = netstatus::parse_signatures(sections.signatures, &mut unrecognized)?;
        for dir_source in dir_sources.values() {
            unrecognized.extend(dir_source.unrecognized_lines.clone());
        }
        for entry in entries.values() {
            unrecognized.extend(entry.unrecognized_lines.clone());
        }

        let digest_sha256 = digest::compute(doc.raw(), &DIGEST)?;

        Ok(NetworkStatusConsensus {
            header,
            consensus_method,
            dir_sources,
            entries,
            bandwidth_weights,
            signatures,
            digest_sha256,
            content: doc.into_content(unrecognized),
        })
    }

    pub fn valid_after(&self) -> DateTime<Utc> {
        self.header.valid_after
    }

    pub fn is_microdesc(&self) -> bool {
        self.header.flavor.as_deref() == Some("microdesc")
    }

    /// Identities of the authorities whose votes this consensus was made
    /// from, legacy entries excluded
    pub fn referenced_votes(&self) -> Vec<Fingerprint> {
        self.dir_sources
            .values()
            .filter(|d| !d.is_legacy)
            .map(|d| d.identity)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::netstatus::Flag;

    pub(crate) const CONSENSUS: &str = "@type network-status-consensus-3 1.0
network-status-version 3
vote-status consensus
consensus-method 11
valid-after 2011-11-30 09:00:00
fresh-until 2011-11-30 10:00:00
valid-until 2011-11-30 12:00:00
voting-delay 300 300
client-versions 0.2.1.31,0.2.2.34
server-versions 0.2.1.31,0.2.2.34
known-flags Authority BadExit Exit Fast Guard HSDir Named Running Stable Unnamed V2Dir Valid
params CircuitPriorityHalflifeMsec=30000 bwauthpid=1
dir-source tor26 14C131DFC5C6F93646BE72FA1401C02A8DF2E8B4 86.59.21.38 86.59.21.38 80 443
contact Peter Palfrader
vote-digest 0B6D1E9A300B895AA2D0B427F92917B6995C3C1C
dir-source moria1 D586D18309DED4CD6D57C18FDB97EFA96D330566 128.31.0.34 128.31.0.34 9131 9101
contact 1024D/28988BF5 arma mit edu
vote-digest 5FCF44F3DAE8F3F1E0DD6E3E6DF1E0DA1D2D6A8E
dir-source moria1-legacy E2A2AF570166665D738736D0DD58169CC61D8A8B 128.31.0.34 128.31.0.34 9131 9101
r seele AAoQ1DAR6kkoo19hBAX5K0QztNw ASG1ZhB4Ad0SsjTzBpA+V8+zWkQ 2011-11-30 08:02:47 67.161.31.147 9001 0
s Running Stable Valid
v Tor 0.2.2.34
w Bandwidth=20
p reject 1-65535
r Unnamed AAvcgAIRgm4yWWG4xHtSeZmY9TY ARuaIiMaDVJ1lw4gd1WmDy6Tk0A 2011-11-30 06:37:47 91.121.146.120 443 80
s Exit Fast Running V2Dir Valid
v Tor 0.2.2.34
w Bandwidth=50 Measured=60
p accept 80,443
directory-footer
bandwidth-weights Wbd=3333 Wbe=0 Wbg=0 Wbm=10000
directory-signature 14C131DFC5C6F93646BE72FA1401C02A8DF2E8B4 BF112F1C6D5543CFD0A32215ACABD4197B5279AD
-----BEGIN SIGNATURE-----
AAAA
-----END SIGNATURE-----
directory-signature D586D18309DED4CD6D57C18FDB97EFA96D330566 5AFAC3D00E97D4C6B8B4E0A5E1B0C3A4E5F6A7B8
-----BEGIN SIGNATURE-----
BBBB
-----END SIGNATURE-----
";

    fn parse(raw: &str) -> Result<NetworkStatusConsensus, DocumentParseError> {
        NetworkStatusConsensus::from_bytes(raw.as_bytes(), &ParseOptions::default())
    }

    #[test]
    fn parses_consensus() {
        let consensus = parse(CONSENSUS).unwrap();
        assert_eq!(consensus.consensus_method, 11);
        assert_eq!(consensus.header.vote_seconds, 300);
        assert_eq!(consensus.header.params["bwauthpid"], 1);
        assert_eq!(consensus.header.client_versions.len(), 2);
        assert_eq!(consensus.dir_sources.len(), 3);
        assert_eq!(consensus.referenced_votes().len(), 2);
        assert_eq!(consensus.entries.len(), 2);
        let exit = consensus
            .entries
            .values()
            .find(|e| e.is_flagged(&Flag::Exit))
            .unwrap();
        assert_eq!(exit.nickname, "Unnamed");
        assert_eq!(exit.measured, Some(60));
        assert_eq!(exit.dir_port, Some(80));
        assert_eq!(consensus.bandwidth_weights["Wbm"], 10000);
        assert_eq!(consensus.signatures.len(), 2);
        assert_eq!(consensus.signatures[0].algorithm, "sha1");
        assert_eq!(consensus.digest_sha256.len(), 64);
        assert_eq!(consensus.content.annotations().len(), 1);
        assert!(!consensus.is_microdesc());
    }

    #[test]
    fn round_trip() {
        let consensus = parse(CONSENSUS).unwrap();
        assert_eq!(consensus.content.bytes(), CONSENSUS.as_bytes());
        let again = NetworkStatusConsensus::from_bytes(consensus.content.bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(consensus, again);
    }

    #[test]
    fn digest_covers_body_only() {
        let consensus = parse(CONSENSUS).unwrap();
        let changed_signature = CONSENSUS.replace("BBBB", "CCCC");
        assert_eq!(parse(&changed_signature).unwrap().digest_sha256, consensus.digest_sha256);
        let changed_body = CONSENSUS.replace("bwauthpid=1", "bwauthpid=2");
        assert_ne!(parse(&changed_body).unwrap().digest_sha256, consensus.digest_sha256);
    }

    #[test]
    fn missing_valid_after() {
        let raw = CONSENSUS.replace("valid-after 2011-11-30 09:00:00\n", "");
        assert!(matches!(
            parse(&raw),
            Err(DocumentParseError::KeywordCount { ref keyword, .. }) if keyword == "valid-after"
        ));
    }

    #[test]
    fn duplicate_valid_after() {
        let raw = CONSENSUS.replace(
            "valid-after 2011-11-30 09:00:00\n",
            "valid-after 2011-11-30 09:00:00\nvalid-after 2011-11-30 09:00:00\n",
        );
        assert!(matches!(
            parse(&raw),
            Err(DocumentParseError::KeywordCount { count: 2, .. })
        ));
    }

    #[test]
    fn missing_signature() {
        let end = CONSENSUS.find("directory-signature").unwrap();
        assert!(parse(&CONSENSUS[..end]).is_err());
    }

    #[test]
    fn rejects_vote() {
        let raw = CONSENSUS.replace("vote-status consensus", "vote-status vote");
        assert!(parse(&raw).is_err());
    }

    #[test]
    fn microdesc_flavor() {
        let raw = CONSENSUS
            .replace("network-status-version 3\n", "network-status-version 3 microdesc\n")
            .replace(
                "r seele AAoQ1DAR6kkoo19hBAX5K0QztNw ASG1ZhB4Ad0SsjTzBpA+V8+zWkQ ",
                "r seele AAoQ1DAR6kkoo19hBAX5K0QztNw ",
            )
            .replace(
                "r Unnamed AAvcgAIRgm4yWWG4xHtSeZmY9TY ARuaIiMaDVJ1lw4gd1WmDy6Tk0A ",
                "r Unnamed AAvcgAIRgm4yWWG4xHtSeZmY9TY ",
            )
            .replace(
                "w Bandwidth=20\n",
                "m ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0\nw Bandwidth=20\n",
            );
        let consensus = parse(&raw).unwrap();
        assert!(consensus.is_microdesc());
        assert!(consensus.entries.values().all(|e| e.digest.is_none()));
        assert_eq!(
            consensus
                .entries
                .values()
                .map(|e| e.microdescriptor_digests.len())
                .sum::<usize>(),
            1
        );
    }

    #[test]
    fn unrecognized_header_line() {
        let raw = CONSENSUS.replace("params ", "future-keyword 1\nparams ");
        let consensus = parse(&raw).unwrap();
        assert_eq!(consensus.content.unrecognized_lines(), &["future-keyword 1".to_string()]);
        assert!(NetworkStatusConsensus::from_bytes(raw.as_bytes(), &ParseOptions::strict()).is_err());
    }
}

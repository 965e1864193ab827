//! Tor network status votes, which directory authorities exchange to
//! compute the consensus.

use std::collections::BTreeMap;

use crate::certificate::DirectoryKeyCertificate;
use crate::descriptor::ParseOptions;
use crate::digest::{self, DigestAlgorithm, DigestEncoding, DigestSpec};
use crate::error::DocumentParseError;
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Document, Fingerprint, Item, RawContent, UnrecognizedLines};
use crate::netstatus::{
    self, DirSourceEntry, DirectorySignature, EntryFlavor, NetworkStatusEntry, SharedRandValue,
    StatusHeader, STATUS_SECTIONS,
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
        "consensus-methods",
        "published",
        "valid-after",
        "fresh-until",
        "valid-until",
        "voting-delay",
        "known-flags",
    ],
    at_most_once: &[
        "client-versions",
        "server-versions",
        "flag-thresholds",
        "recommended-client-protocols",
        "recommended-relay-protocols",
        "required-client-protocols",
        "required-relay-protocols",
        "params",
        "bandwidth-file-headers",
        "bandwidth-file-digest",
    ],
    ..Rules::NONE
};

const AUTHORITY_RULES: Rules = Rules {
    first: Some("dir-source"),
    exactly_once: &["dir-source", "contact"],
    at_most_once: &[
        "legacy-dir-key",
        "shared-rand-participate",
        "shared-rand-previous-value",
        "shared-rand-current-value",
    ],
    ..Rules::NONE
};

const SIGNATURE_RULES: Rules = Rules {
    exactly_once: &["directory-signature"],
    ..Rules::NONE
};

const DIGEST: DigestSpec = DigestSpec {
    start: "network-status-version ",
    end: Some("\ndirectory-signature "),
    algorithm: DigestAlgorithm::Sha1,
    encoding: DigestEncoding::HexUpper,
};

/// A parsed vote
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStatusVote {
    pub header: StatusHeader,
    pub consensus_methods: Vec<u32>,
    pub published: DateTime<Utc>,
    pub flag_thresholds: BTreeMap<String, f64>,
    pub bandwidth_file_headers: BTreeMap<String, String>,
    pub bandwidth_file_digest: Vec<String>,
    /// The voting authority
    pub dir_source: DirSourceEntry,
    pub legacy_dir_key: Option<Fingerprint>,
    pub shared_rand_participate: bool,
    pub shared_rand_commits: Vec<String>,
    pub shared_rand_previous_value: Option<SharedRandValue>,
    pub shared_rand_current_value: Option<SharedRandValue>,
    pub certificate: DirectoryKeyCertificate,
    pub entries: BTreeMap<Fingerprint, NetworkStatusEntry>,
    pub signature: DirectorySignature,
    /// SHA-1 over `network-status-version` through `directory-signature `
    pub digest_sha1: String,
    pub content: RawContent,
}

/// The authority part of a vote's dir source section
struct Authority {
    dir_source: DirSourceEntry,
    legacy_dir_key: Option<Fingerprint>,
    shared_rand_participate: bool,
    shared_rand_commits: Vec<String>,
    shared_rand_previous_value: Option<SharedRandValue>,
    shared_rand_current_value: Option<SharedRandValue>,
}

impl Authority {
    fn parse(
        items: &[Item],
        unrecognized: &mut UnrecognizedLines,
        fragment: String,
    ) -> Result<Authority, DocumentParseError> {
        AUTHORITY_RULES.check_items(items, fragment)?;
        let mut authority = Authority {
            dir_source: DirSourceEntry::from_line(&items[0])?,
            legacy_dir_key: None,
            shared_rand_participate: false,
            shared_rand_commits: Vec::new(),
            shared_rand_previous_value: None,
            shared_rand_current_value: None,
        };
        for item in items.iter().skip(1) {
            let line = item.line();
            match item.keyword() {
                "contact" => {
                    authority.dir_source.contact = Some(item.arguments().unwrap_or("").to_string());
                }
                "legacy-dir-key" => {
                    let key = fields::parse_hex_fingerprint(item.args_exactly(1)?[0], line)?;
                    authority.legacy_dir_key = Some(key);
                }
                "shared-rand-participate" => {
                    item.no_arguments()?;
                    authority.shared_rand_participate = true;
                }
                "shared-rand-commit" => {
                    authority
                        .shared_rand_commits
                        .push(item.args_at_least(4)?.join(" "));
                }
                "shared-rand-previous-value" => {
                    authority.shared_rand_previous_value = Some(SharedRandValue::parse(item)?);
                }
                "shared-rand-current-value" => {
                    authority.shared_rand_current_value = Some(SharedRandValue::parse(item)?);
                }
                _ => unrecognized.record(item)?,
            }
        }
        Ok(authority)
    }
}

impl NetworkStatusVote {
    pub fn from_bytes(raw: &[u8], options: &ParseOptions) -> Result<Self, DocumentParseError> {
        Self::from_doc(Document::parse_single(raw)?, options)
    }

    pub(crate) fn from_doc(doc: Document, options: &ParseOptions) -> Result<Self, DocumentParseError> {
        let sections = netstatus::split_sections(&doc.items, &STATUS_SECTIONS)?;
        HEADER_RULES.check_items(sections.header, doc.fragment())?;
        SIGNATURE_RULES.check_items(sections.signatures, doc.fragment())?;

        let mut unrecognized = UnrecognizedLines::new(options);
        let mut consensus_methods = Vec::new();
        let mut published = None;
        let mut flag_thresholds = BTreeMap::new();
        let mut bandwidth_file_headers = BTreeMap::new();
        let mut bandwidth_file_digest = Vec::new();
        let header = StatusHeader::parse(sections.header, &mut unrecognized, |item| {
            let line = item.line();
            match item.keyword() {
                "consensus-methods" => {
                    consensus_methods = item
                        .args_at_least(1)?
                        .into_iter()
                        .map(|m| fields::parse_int::<u32>(m, line))
                        .collect::<Result<_, _>>()?;
                }
                "published" => {
                    published = Some(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "flag-thresholds" => {
                    flag_thresholds = netstatus::parse_flag_thresholds(item)?;
                }
                "bandwidth-file-headers" => {
                    bandwidth_file_headers = fields::parse_key_values(&item.args(), line)?;
                }
                "bandwidth-file-digest" => {
                    bandwidth_file_digest = item.args().into_iter().map(str::to_string).collect();
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        if header.vote_status != "vote" {
            return Err(DocumentParseError::illegal(
                format!("vote-status {}", header.vote_status),
                "expected vote",
            ));
        }
        let published = published.ok_or_else(|| DocumentParseError::args_missing("published"))?;

        // the dir source section holds the authority, then its certificate
        let cert_start = sections
            .dir_sources
            .iter()
            .position(|i| i.keyword() == "dir-key-certificate-version")
            .ok_or_else(|| DocumentParseError::KeywordCount {
                keyword: "dir-key-certificate-version".to_string(),
                constraint: "exactly once",
                count: 0,
                fragment: doc.fragment(),
            })?;
        let authority = Authority::parse(
            &sections.dir_sources[..cert_start],
            &mut unrecognized,
            doc.fragment(),
        )?;
        let cert_end = sections
            .entries
            .first()
            .or_else(|| sections.footer.first())
            .or_else(|| sections.signatures.first())
            .map(|i| i.offset)
            .unwrap_or(doc.raw().len());
        let cert_bytes = &doc.raw()[sections.dir_sources[cert_start].offset..cert_end];
        let certificate = DirectoryKeyCertificate::from_bytes(cert_bytes, options)?;
        unrecognized.extend(certificate.content.unrecognized_lines().to_vec());

        let entries = netstatus::parse_entries(sections.entries, EntryFlavor::Vote, options)?;
        for entry in entries.values() {
            unrecognized.extend(entry.unrecognized_lines.clone());
        }
        netstatus::parse_footer(sections.footer, &mut unrecognized)?;
        let signature = netstatus::parse_signatures(sections.signatures, &mut unrecognized)?
            .pop()
            .ok_or_else(|| DocumentParseError::args_missing("directory-signature"))?;

        let digest_sha1 = digest::compute(doc.raw(), &DIGEST)?;

        Ok(NetworkStatusVote {
            header,
            consensus_methods,
            published,
            flag_thresholds,
            bandwidth_file_headers,
            bandwidth_file_digest,
            dir_source: authority.dir_source,
            legacy_dir_key: authority.legacy_dir_key,
            shared_rand_participate: authority.shared_rand_participate,
            shared_rand_commits: authority.shared_rand_commits,
            shared_rand_previous_value: authority.shared_rand_previous_value,
            shared_rand_current_value: authority.shared_rand_current_value,
            certificate,
            entries,
            signature,
            digest_sha1,
            content: doc.into_content(unrecognized),
        })
    }

    /// Identity of the voting authority
    pub fn identity(&self) -> Fingerprint {
        self.dir_source.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netstatus::Flag;

    const VOTE: &str = "network-status-version 3
vote-status vote
consensus-methods 28 29 30
published 2020-05-01 11:50:00
valid-after 2020-05-01 12:00:00
fresh-until 2020-05-01 13:00:00
valid-until 2020-05-01 15:00:00
voting-delay 300 300
client-versions 0.4.2.7
server-versions 0.4.2.7
known-flags Authority Exit Fast Guard HSDir Running Stable V2Dir Valid
flag-thresholds stable-uptime=1693440 fast-speed=102000 guard-wfu=98.000% enough-mtbf=1
params CircwindowCell=1000
dir-source moria1 D586D18309DED4CD6D57C18FDB97EFA96D330566 128.31.0.34 128.31.0.34 9131 9101
contact 1024D/28988BF5 arma mit edu
shared-rand-participate
shared-rand-commit 1 sha3-256 D586D18309DED4CD6D57C18FDB97EFA96D330566 AAAAAFqLAABIsM5A
shared-rand-current-value 9 ZG9uZQ
dir-key-certificate-version 3
fingerprint D586D18309DED4CD6D57C18FDB97EFA96D330566
dir-key-published 2020-01-01 00:00:00
dir-key-expires 2021-01-01 00:00:00
dir-identity-key
-----BEGIN RSA PUBLIC KEY-----
MIIBigKCAYEA
-----END RSA PUBLIC KEY-----
dir-signing-key
-----BEGIN RSA PUBLIC KEY-----
MIGJAoGBAL
-----END RSA PUBLIC KEY-----
dir-key-certification
-----BEGIN SIGNATURE-----
d8vtgJ4G
-----END SIGNATURE-----
r seele AAoQ1DAR6kkoo19hBAX5K0QztNw ASG1ZhB4Ad0SsjTzBpA+V8+zWkQ 2020-05-01 08:02:47 67.161.31.147 9001 0
s Running Stable Valid
v Tor 0.4.2.7
w Bandwidth=20 Measured=30
p reject 1-65535
id ed25519 none
m 28,29 sha256=ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0
m 30 sha256=ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0
stats wfu=0.991 tk=25 mtbf=300
directory-footer
directory-signature D586D18309DED4CD6D57C18FDB97EFA96D330566 5AFAC3D00E97D4C6B8B4E0A5E1B0C3A4E5F6A7B8
-----BEGIN SIGNATURE-----
AAAA
-----END SIGNATURE-----
";

    fn parse(raw: &str) -> Result<NetworkStatusVote, DocumentParseError> {
        NetworkStatusVote::from_bytes(raw.as_bytes(), &ParseOptions::default())
    }

    #[test]
    fn parses_vote() {
        let vote = parse(VOTE).unwrap();
        assert_eq!(vote.consensus_methods, vec![28, 29, 30]);
        assert_eq!(vote.identity().to_string(), "D586D18309DED4CD6D57C18FDB97EFA96D330566");
        assert_eq!(vote.dir_source.contact.as_deref(), Some("1024D/28988BF5 arma mit edu"));
        assert_eq!(vote.flag_thresholds["guard-wfu"], 0.98);
        assert_eq!(vote.flag_thresholds["fast-speed"], 102000.0);
        assert!(vote.shared_rand_participate);
        assert_eq!(vote.shared_rand_commits.len(), 1);
        assert_eq!(vote.shared_rand_current_value.as_ref().unwrap().num_reveals, 9);
        assert_eq!(vote.certificate.fingerprint, vote.identity());
        assert!(vote.certificate.content.bytes().starts_with(b"dir-key-certificate-version 3\n"));
        assert!(vote.certificate.content.bytes().ends_with(b"-----END SIGNATURE-----\n"));

        let entry = vote.entries.values().next().unwrap();
        assert!(entry.is_flagged(&Flag::Running));
        assert_eq!(entry.measured, Some(30));
        assert_eq!(entry.master_key_ed25519, None);
        assert_eq!(entry.microdescriptor_methods.len(), 2);
        assert_eq!(entry.microdescriptor_digests.len(), 1);
        assert_eq!(entry.stats["tk"], 25.0);

        assert_eq!(vote.signature.identity, vote.identity());
        assert_eq!(vote.digest_sha1.len(), 40);
        assert!(vote.content.unrecognized_lines().is_empty());
    }

    #[test]
    fn round_trip() {
        let vote = parse(VOTE).unwrap();
        let again = NetworkStatusVote::from_bytes(vote.content.bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(vote, again);
    }

    #[test]
    fn missing_certificate() {
        let start = VOTE.find("dir-key-certificate-version").unwrap();
        let end = VOTE.find("r seele").unwrap();
        let raw = format!("{}{}", &VOTE[..start], &VOTE[end..]);
        assert!(matches!(
            parse(&raw),
            Err(DocumentParseError::KeywordCount { count: 0, .. })
        ));
    }

    #[test]
    fn two_signatures() {
        let start = VOTE.find("directory-signature").unwrap();
        let raw = format!("{}{}", VOTE, &VOTE[start..]);
        assert!(parse(&raw).is_err());
    }

    #[test]
    fn missing_published() {
        let raw = VOTE.replace("published 2020-05-01 11:50:00\n", "");
        assert!(matches!(
            parse(&raw),
            Err(DocumentParseError::KeywordCount { ref keyword, .. }) if keyword == "published"
        ));
    }

    #[test]
    fn entry_without_r_line_fields() {
        let raw = VOTE.replace(" 67.161.31.147 9001 0\n", " 67.161.31.147 9001\n");
        assert!(parse(&raw).is_err());
    }
}

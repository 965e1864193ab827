//! Status entries: the per-relay `r`/`a`/`s`/`v`/`pr`/`w`/`p`/`m`/`id`
//! blocks of consensuses, votes and bridge network statuses.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::num::ParseIntError;
use std::str::FromStr;

use crate::descriptor::ParseOptions;
use crate::error::{DocumentParseError, ErrorContext};
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Fingerprint, Item, UnrecognizedLines};

//
// External dependencies
//
use chrono::{DateTime, Utc};
use derive_builder::Builder;
use strum::{EnumString, IntoStaticStr};

/// A relay flag in a network status
#[derive(Debug, Clone, EnumString, IntoStaticStr, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Authority,
    BadExit,
    Exit,
    Fast,
    Guard,
    HSDir,
    MiddleOnly,
    Named,
    Unnamed,
    NoEdConsensus,
    Running,
    Stable,
    StaleDesc,
    Sybil,
    V2Dir,
    Valid,
    /// A flag introduced after this list was written
    #[strum(default)]
    Other(String),
}

impl Flag {
    pub fn as_str(&self) -> &str {
        match self {
            Flag::Other(name) => name,
            known => known.into(),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A Tor sub-protocol
#[derive(Debug, Clone, EnumString, IntoStaticStr, PartialEq, PartialOrd, Eq, Ord)]
pub enum Protocol {
    Conflux,
    Cons,
    Desc,
    DirCache,
    FlowCtrl,
    HSDir,
    HSIntro,
    HSRend,
    Link,
    LinkAuth,
    Microdesc,
    Padding,
    Relay,
    #[strum(default)]
    Other(String),
}

/// A range of supported protocol versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedProtocolVersion {
    versions: Vec<u8>,
}

impl SupportedProtocolVersion {
    pub fn supports(&self, v: u8) -> bool {
        self.versions.contains(&v)
    }
}

impl fmt::Display for SupportedProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut last_version = None;
        let mut range_end = None;
        for v in self.versions.iter().copied() {
            match last_version {
                Some(last) => {
                    if v == last + 1 {
                        if range_end.is_none() {
                            write!(f, "-")?;
                        }
                        range_end = Some(v);
                    } else {
                        if let Some(x) = range_end.take() {
                            write!(f, "{}", x)?;
                        }
                        write!(f, ",{}", v)?;
                    }
                }
                None => {
                    // first element
                    write!(f, "{}", v)?;
                }
            }
            last_version = Some(v);
        }
        if let Some(x) = range_end.take() {
            write!(f, "{}", x)?;
        }

        Ok(())
    }
}

impl FromStr for SupportedProtocolVersion {
    type Err = DocumentParseError;

    /// Parse from "3", "2-5" or "1-2,4".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut versions = Vec::new();
        for component in s.split(',').filter(|c| !c.is_empty()) {
            match component.split_once('-') {
                Some((min, max)) => {
                    let min = u8::from_str_radix(min, 10).context("protocol version (from)")?;
                    let max = u8::from_str_radix(max, 10).context("protocol version (to)")?;

                    for i in min..=max {
                        versions.push(i);
                    }
                }
                None => {
                    let elem = u8::from_str_radix(component, 10).context("protocol version")?;
                    versions.push(elem);
                }
            }
        }
        versions.sort_unstable();
        versions.dedup();
        Ok(SupportedProtocolVersion { versions })
    }
}

/// Parse a protocol list such as `Cons=1-2 Desc=1-2 Link=1-5`
pub fn parse_protocols(
    args: &[&str],
    line: &str,
) -> Result<BTreeMap<Protocol, SupportedProtocolVersion>, DocumentParseError> {
    let mut protocols = BTreeMap::new();
    for split in args.iter() {
        let (left, right) = split
            .split_once('=')
            .ok_or_else(|| DocumentParseError::InvalidArgumentDict {
                line: line.to_string(),
            })?;
        let prot = left
            .parse::<Protocol>()
            .map_err(|_| DocumentParseError::UnknownProtocol {
                protocol: left.to_string(),
            })?;
        let vers = right
            .parse::<SupportedProtocolVersion>()
            .map_err(|_| DocumentParseError::InvalidProtocolVersion {
                raw: right.to_string(),
            })?;
        if protocols.insert(prot, vers).is_some() {
            return Err(DocumentParseError::DuplicateEntry {
                key: left.to_string(),
                line: line.to_string(),
            });
        }
    }
    Ok(protocols)
}

/// Exit policy type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicyType {
    Accept,
    Reject,
}

/// Exit port entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicyEntry {
    SinglePort(u16),
    PortRange { min: u16, max: u16 },
}

impl ExitPolicyEntry {
    pub fn to_ports(&self) -> Vec<u16> {
        self.iter_ports().collect()
    }

    pub fn iter_ports(&self) -> impl Iterator<Item = u16> {
        match *self {
            ExitPolicyEntry::SinglePort(x) => x..=x,
            ExitPolicyEntry::PortRange { min, max } => min..=max,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        match *self {
            ExitPolicyEntry::SinglePort(x) => x == port,
            ExitPolicyEntry::PortRange { min, max } => min <= port && port <= max,
        }
    }
}

impl FromStr for ExitPolicyEntry {
    type Err = DocumentParseError;

    /// Parse from "3" or "2-5".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            |_: ParseIntError| DocumentParseError::InvalidExitPolicyEntry { raw: s.to_string() };
        match s.split_once('-') {
            Some((min, max)) => Ok(ExitPolicyEntry::PortRange {
                min: u16::from_str_radix(min, 10).map_err(invalid)?,
                max: u16::from_str_radix(max, 10).map_err(invalid)?,
            }),
            None => Ok(ExitPolicyEntry::SinglePort(
                u16::from_str_radix(s, 10).map_err(invalid)?,
            )),
        }
    }
}

impl fmt::Display for ExitPolicyEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitPolicyEntry::SinglePort(x) => {
                write!(f, "{}", x)?;
            }
            ExitPolicyEntry::PortRange { min: x, max: y } => {
                write!(f, "{}-{}", x, y)?;
            }
        }
        Ok(())
    }
}

/// A relay's condensed exit policy (ports for "most" target IP addresses)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondensedExitPolicy {
    pub policy_type: ExitPolicyType,
    pub entries: Vec<ExitPolicyEntry>,
}

impl CondensedExitPolicy {
    pub fn allows_port(&self, port: u16) -> bool {
        let listed = self.entries.iter().any(|entry| entry.contains(port));
        match self.policy_type {
            ExitPolicyType::Accept => listed,
            ExitPolicyType::Reject => !listed,
        }
    }
}

impl FromStr for CondensedExitPolicy {
    type Err = DocumentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cmd, ports) = s
            .split_once(' ')
            .ok_or(DocumentParseError::MalformedExitPolicy)?;
        let policy_type = match cmd {
            "accept" => ExitPolicyType::Accept,
            "reject" => ExitPolicyType::Reject,
            _ => return Err(DocumentParseError::MalformedExitPolicy),
        };
        let entries = ports
            .trim()
            .split(',')
            .map(|x| x.parse::<ExitPolicyEntry>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CondensedExitPolicy {
            policy_type,
            entries,
        })
    }
}

impl fmt::Display for CondensedExitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}",
            match self.policy_type {
                ExitPolicyType::Accept => "accept",
                ExitPolicyType::Reject => "reject",
            },
            self.entries
                .iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(",")
        )
    }
}

/// Which kind of document a status entry lives in; decides the shape of
/// `r` and `m` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlavor {
    Consensus,
    MicrodescConsensus,
    Vote,
    BridgeStatus,
}

/// Microdescriptor digests listed for a set of consensus methods in a vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrodescDigests {
    pub consensus_methods: Vec<u32>,
    pub digests: BTreeMap<String, String>,
}

/// A relay entry within a network status, containing only these sparse
/// information instead of the full server descriptor
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(private)]
pub struct NetworkStatusEntry {
    pub nickname: String,
    pub fingerprint: Fingerprint,
    /// Server descriptor digest; absent in microdescriptor consensuses
    #[builder(default)]
    pub digest: Option<Fingerprint>,
    pub published: DateTime<Utc>,
    pub address: Ipv4Addr,
    pub or_port: u16,
    pub dir_port: Option<u16>,
    #[builder(default)]
    pub or_addresses: Vec<(IpAddr, u16)>,
    #[builder(default)]
    pub flags: BTreeSet<Flag>,
    #[builder(default)]
    pub version_line: Option<String>,
    #[builder(default)]
    pub protocols: BTreeMap<Protocol, SupportedProtocolVersion>,
    #[builder(default)]
    pub exit_policy: Option<CondensedExitPolicy>,
    #[builder(default)]
    pub bandwidth_weight: Option<u64>,
    #[builder(default)]
    pub measured: Option<u64>,
    #[builder(default)]
    pub unmeasured: bool,
    /// Microdescriptor digests referenced by this entry (by value)
    #[builder(default)]
    pub microdescriptor_digests: BTreeSet<String>,
    /// Per-method digests, only in votes
    #[builder(default)]
    pub microdescriptor_methods: Vec<MicrodescDigests>,
    #[builder(default)]
    pub master_key_ed25519: Option<String>,
    #[builder(default)]
    pub stats: BTreeMap<String, f64>,
    #[builder(default)]
    pub unrecognized_lines: Vec<String>,
}

const ENTRY_RULES: Rules = Rules {
    first: Some("r"),
    exactly_once: &["r"],
    at_most_once: &["s", "v", "pr", "w", "p", "id", "stats"],
    ..Rules::NONE
};

impl NetworkStatusEntry {
    pub fn is_flagged(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    /// Decode one entry from its items, the first being its `r` line.
    pub(crate) fn from_items(
        items: &[Item],
        flavor: EntryFlavor,
        options: &ParseOptions,
    ) -> Result<NetworkStatusEntry, DocumentParseError> {
        let fragment = items.first().map(|i| i.line().to_string()).unwrap_or_default();
        ENTRY_RULES.check_items(items, fragment)?;

        let mut relay = NetworkStatusEntryBuilder::default();
        let mut unrecognized = UnrecognizedLines::new(options);

        for item in items.iter() {
            let line = item.line();
            match item.keyword() {
                "r" => parse_r_line(&mut relay, item, flavor)?,
                "a" => {
                    let or_address = fields::parse_address_port(item.get_argument()?, line)?;
                    relay.or_addresses.get_or_insert_with(Vec::new).push(or_address);
                }
                "s" => {
                    // parse flags
                    let flags = item
                        .args()
                        .iter()
                        .map(|x| x.parse::<Flag>())
                        .collect::<Result<BTreeSet<_>, _>>()
                        .map_err(|_| DocumentParseError::illegal(line, "invalid flag"))?;
                    relay.flags(flags);
                }
                "v" => {
                    relay.version_line(item.arguments().map(str::to_string));
                }
                "pr" => {
                    relay.protocols(parse_protocols(&item.args(), line)?);
                }
                "w" => parse_w_line(&mut relay, item)?,
                "p" => {
                    // parse policy
                    let policy = item
                        .get_argument()?
                        .parse::<CondensedExitPolicy>()
                        .map_err(|_| DocumentParseError::illegal(line, "invalid exit policy"))?;
                    relay.exit_policy(Some(policy));
                }
                "m" => parse_m_line(&mut relay, item, flavor)?,
                "id" if flavor == EntryFlavor::Vote => {
                    let args = item.args_exactly(2)?;
                    if args[0] != "ed25519" {
                        return Err(DocumentParseError::illegal(line, "unknown key type"));
                    }
                    if args[1] != "none" {
                        relay.master_key_ed25519(Some(fields::parse_base64(args[1], line)?));
                    }
                }
                "stats" if flavor == EntryFlavor::Vote => {
                    let stats = fields::parse_key_values(&item.args(), line)?
                        .into_iter()
                        .map(|(k, v)| Ok((k, fields::parse_decimal(&v, line)?)))
                        .collect::<Result<BTreeMap<_, _>, DocumentParseError>>()?;
                    relay.stats(stats);
                }
                _ => unrecognized.record(item)?,
            }
        }
        relay.unrecognized_lines(unrecognized.into_lines());

        relay
            .build()
            .map_err(|err| DocumentParseError::Incomplete(Box::new(err)))
    }
}

fn parse_r_line(
    relay: &mut NetworkStatusEntryBuilder,
    item: &Item,
    flavor: EntryFlavor,
) -> Result<(), DocumentParseError> {
    let line = item.line();
    let splits = item.split_arguments()?;
    let (nickname, identity, digest, rest) = match (flavor, &splits[..]) {
        (EntryFlavor::MicrodescConsensus, [nickname, identity, rest @ ..]) if rest.len() == 5 => {
            (*nickname, *identity, None, rest)
        }
        (EntryFlavor::MicrodescConsensus, _) => {
            return Err(DocumentParseError::illegal(line, "expected 7 arguments"))
        }
        (_, [nickname, identity, digest, rest @ ..]) if rest.len() == 5 => {
            (*nickname, *identity, Some(*digest), rest)
        }
        _ => return Err(DocumentParseError::illegal(line, "expected 8 arguments")),
    };
    let [published_1, published_2, ip, or_port, dir_port] = rest else {
        return Err(DocumentParseError::args_missing(line));
    };

    relay.nickname(fields::parse_nickname(nickname, line)?);
    relay.fingerprint(fields::parse_b64_fingerprint(identity, line)?);
    if let Some(digest) = digest {
        relay.digest(Some(fields::parse_b64_fingerprint(digest, line)?));
    }
    relay.published(fields::parse_timestamp_args(published_1, published_2, line)?);
    relay.address(fields::parse_ipv4(ip, line)?);
    relay.or_port(fields::parse_port(or_port, line)?);
    relay.dir_port(match fields::parse_port(dir_port, line)? {
        0 => None,
        x => Some(x),
    });
    Ok(())
}

fn parse_w_line(relay: &mut NetworkStatusEntryBuilder, item: &Item) -> Result<(), DocumentParseError> {
    let line = item.line();
    let weights = fields::parse_key_values(&item.args(), line)?;
    for (k, v) in weights.iter() {
        match k.as_str() {
            "Bandwidth" => {
                relay.bandwidth_weight(Some(fields::parse_int(v, line)?));
            }
            "Measured" => {
                relay.measured(Some(fields::parse_int(v, line)?));
            }
            "Unmeasured" => {
                relay.unmeasured(v == "1");
            }
            _ => {}
        }
    }
    if !weights.contains_key("Bandwidth") {
        return Err(DocumentParseError::illegal(line, "missing Bandwidth="));
    }
    Ok(())
}

fn parse_m_line(
    relay: &mut NetworkStatusEntryBuilder,
    item: &Item,
    flavor: EntryFlavor,
) -> Result<(), DocumentParseError> {
    let line = item.line();
    match flavor {
        EntryFlavor::MicrodescConsensus => {
            let digest = fields::parse_b64_digest256(item.args_exactly(1)?[0], line)?;
            relay
                .microdescriptor_digests
                .get_or_insert_with(BTreeSet::new)
                .insert(digest);
        }
        EntryFlavor::Vote => {
            let args = item.args_at_least(2)?;
            let consensus_methods = args[0]
                .split(',')
                .map(|m| fields::parse_int::<u32>(m, line))
                .collect::<Result<Vec<_>, _>>()?;
            let mut digests = BTreeMap::new();
            for arg in &args[1..] {
                let (algorithm, digest) = arg
                    .split_once('=')
                    .ok_or_else(|| DocumentParseError::InvalidArgumentDict {
                        line: line.to_string(),
                    })?;
                let digest = fields::parse_b64_digest256(digest, line)?;
                relay
                    .microdescriptor_digests
                    .get_or_insert_with(BTreeSet::new)
                    .insert(digest.clone());
                digests.insert(algorithm.to_string(), digest);
            }
            relay
                .microdescriptor_methods
                .get_or_insert_with(Vec::new)
                .push(MicrodescDigests {
                    consensus_methods,
                    digests,
                });
        }
        _ => return Err(DocumentParseError::UnexpectedKeyword {
            keyword: item.keyword().to_string(),
        }),
    }
    Ok(())
}

/// Split a run of entry items at each `r` line and decode each entry.
pub(crate) fn parse_entries(
    items: &[Item],
    flavor: EntryFlavor,
    options: &ParseOptions,
) -> Result<BTreeMap<Fingerprint, NetworkStatusEntry>, DocumentParseError> {
    let mut entries = BTreeMap::new();
    for chunk in super::chunks(items, "r") {
        let entry = NetworkStatusEntry::from_items(chunk, flavor, options)?;
        if entries.contains_key(&entry.fingerprint) {
            return Err(DocumentParseError::DuplicateEntry {
                key: entry.fingerprint.to_string(),
                line: chunk[0].line().to_string(),
            });
        }
        entries.insert(entry.fingerprint, entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Document;

    const ENTRY: &[u8] = b"r seele AAoQ1DAR6kkoo19hBAX5K0QztNw ASG1ZhB4Ad0SsjTzBpA+V8+zWkQ 2015-08-22 13:38:54 67.161.31.147 9001 0
a [2001:db8::1]:9001
s Running Stable Valid NewFlag
v Tor 0.2.6.10
pr Cons=1-2 Desc=1-2 Link=1-4
w Bandwidth=20 Unmeasured=1
p reject 1-65535
";

    fn parse(raw: &[u8], flavor: EntryFlavor) -> Result<NetworkStatusEntry, DocumentParseError> {
        let doc = Document::parse_single(raw)?;
        NetworkStatusEntry::from_items(&doc.items, flavor, &ParseOptions::default())
    }

    #[test]
    fn full_entry() {
        let entry = parse(ENTRY, EntryFlavor::Consensus).unwrap();
        assert_eq!(entry.nickname, "seele");
        assert_eq!(entry.fingerprint.to_string(), "000A10D43011EA4928A35F610405F92B4433B4DC");
        assert_eq!(entry.dir_port, None);
        assert_eq!(entry.or_addresses.len(), 1);
        assert!(entry.is_flagged(&Flag::Stable));
        assert!(entry.is_flagged(&Flag::Other("NewFlag".to_string())));
        assert_eq!(entry.version_line.as_deref(), Some("Tor 0.2.6.10"));
        assert!(entry.protocols[&Protocol::Link].supports(4));
        assert_eq!(entry.bandwidth_weight, Some(20));
        assert!(entry.unmeasured);
        assert!(!entry.exit_policy.as_ref().unwrap().allows_port(80));
    }

    #[test]
    fn microdesc_flavor() {
        let raw = b"r seele AAoQ1DAR6kkoo19hBAX5K0QztNw 2015-08-22 13:38:54 67.161.31.147 9001 0\nm ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0\n";
        let entry = parse(raw, EntryFlavor::MicrodescConsensus).unwrap();
        assert_eq!(entry.digest, None);
        assert!(entry
            .microdescriptor_digests
            .contains("ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0"));
        assert!(parse(raw, EntryFlavor::Consensus).is_err());
    }

    #[test]
    fn vote_m_lines() {
        let raw = b"r seele AAoQ1DAR6kkoo19hBAX5K0QztNw ASG1ZhB4Ad0SsjTzBpA+V8+zWkQ 2015-08-22 13:38:54 67.161.31.147 9001 0\nm 13,14 sha256=ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0\nid ed25519 none\n";
        let entry = parse(raw, EntryFlavor::Vote).unwrap();
        assert_eq!(entry.microdescriptor_methods[0].consensus_methods, vec![13, 14]);
        assert_eq!(entry.microdescriptor_digests.len(), 1);
        assert_eq!(entry.master_key_ed25519, None);
    }

    #[test]
    fn duplicate_s_line() {
        let mut raw = ENTRY.to_vec();
        raw.extend_from_slice(b"s Running\n");
        assert!(matches!(
            parse(&raw, EntryFlavor::Consensus),
            Err(DocumentParseError::KeywordCount { .. })
        ));
    }

    #[test]
    fn unrecognized_lines() {
        let mut raw = ENTRY.to_vec();
        raw.extend_from_slice(b"future stuff\n");
        let entry = parse(&raw, EntryFlavor::Consensus).unwrap();
        assert_eq!(entry.unrecognized_lines, vec!["future stuff".to_string()]);

        let doc = Document::parse_single(&raw).unwrap();
        assert!(NetworkStatusEntry::from_items(&doc.items, EntryFlavor::Consensus, &ParseOptions::strict()).is_err());
    }

    #[test]
    fn protocol_versions() {
        let v: SupportedProtocolVersion = "1-3,5".parse().unwrap();
        assert!(v.supports(2));
        assert!(!v.supports(4));
        assert_eq!(v.to_string(), "1-3,5");
    }

    #[test]
    fn condensed_policy() {
        let p: CondensedExitPolicy = "accept 80,443,6660-6669".parse().unwrap();
        assert!(p.allows_port(6665));
        assert!(!p.allows_port(22));
        assert_eq!(p.to_string(), "accept 80,443,6660-6669");
    }
}

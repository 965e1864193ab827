//! Tor server descriptor documents, published by relays and (sanitized) by
//! bridges

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::descriptor::ParseOptions;
use crate::digest::{self, DigestAlgorithm, DigestEncoding, DigestSpec};
use crate::error::DocumentParseError;
use crate::fields::{self, BandwidthHistory};
use crate::grammar::Rules;
use crate::meta::{Document, Fingerprint, Item, RawContent, UnrecognizedLines};
use crate::netstatus::{parse_protocols, CondensedExitPolicy, ExitPolicyType, Protocol, SupportedProtocolVersion};

mod exit;
pub use exit::{ExitPolicy, ExitPolicyAddress, ExitPolicyPort, ExitPolicyRule, ExitPortRange};

//
// External dependencies
//
use chrono::{DateTime, Utc};
use derive_builder::Builder;

pub(crate) const START_KEYWORD: &str = "router ";

const COMMON_AT_MOST_ONCE: &[&str] = &[
    "platform",
    "proto",
    "fingerprint",
    "hibernating",
    "uptime",
    "onion-key",
    "signing-key",
    "contact",
    "family",
    "read-history",
    "write-history",
    "eventdns",
    "caches-extra-info",
    "extra-info-digest",
    "hidden-service-dir",
    "protocols",
    "allow-single-hop-exits",
    "ipv6-policy",
    "ntor-onion-key",
    "identity-ed25519",
    "master-key-ed25519",
    "router-sig-ed25519",
    "onion-key-crosscert",
    "ntor-onion-key-crosscert",
    "tunnelled-dir-server",
    "bridge-distribution-request",
    "router-digest-sha256",
    "overload-general",
];

const RELAY_RULES: Rules = Rules {
    first: Some("router"),
    last: Some("router-signature"),
    exactly_once: &["router", "bandwidth", "published", "router-signature"],
    at_most_once: COMMON_AT_MOST_ONCE,
    requires: &[("router-sig-ed25519", "identity-ed25519")],
    ..Rules::NONE
};

const BRIDGE_RULES: Rules = Rules {
    first: Some("router"),
    exactly_once: &["router", "bandwidth", "published", "router-digest"],
    at_most_once: COMMON_AT_MOST_ONCE,
    ..Rules::NONE
};

const DIGEST_SHA1: DigestSpec = DigestSpec {
    start: START_KEYWORD,
    end: Some("\nrouter-signature\n"),
    algorithm: DigestAlgorithm::Sha1,
    encoding: DigestEncoding::HexUpper,
};

const DIGEST_SHA256: DigestSpec = DigestSpec {
    start: START_KEYWORD,
    end: Some("\n-----END SIGNATURE-----\n"),
    algorithm: DigestAlgorithm::Sha256,
    encoding: DigestEncoding::Base64,
};

/// Whether a descriptor was published by a relay or is a sanitized bridge
/// descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publisher {
    Relay,
    Bridge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyMember {
    Fingerprint(Fingerprint),
    Nickname(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrAddress {
    pub ip: IpAddr,
    pub port: u16,
}

/// A server descriptor.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(private)]
pub struct ServerDescriptor {
    pub publisher: Publisher,
    pub nickname: String,
    pub address: IpAddr,
    pub or_port: u16,
    pub socks_port: u16,
    pub dir_port: u16,
    /// Additional addresses from `or-address` lines
    #[builder(default)]
    pub or_addresses: Vec<OrAddress>,
    pub bandwidth_avg: u64,
    pub bandwidth_burst: u64,
    pub bandwidth_observed: u64,
    pub published: DateTime<Utc>,
    #[builder(default)]
    pub platform: Option<String>,
    #[builder(default)]
    pub protocols: BTreeMap<Protocol, SupportedProtocolVersion>,
    /// The pre-`proto` link and circuit protocol line
    #[builder(default)]
    pub legacy_protocols: Option<String>,
    #[builder(default)]
    pub fingerprint: Option<Fingerprint>,
    #[builder(default)]
    pub hibernating: bool,
    #[builder(default)]
    pub uptime: Option<u64>,
    #[builder(default)]
    pub onion_key: Option<String>,
    #[builder(default)]
    pub signing_key: Option<String>,
    #[builder(default)]
    pub ntor_onion_key: Option<String>,
    #[builder(default)]
    pub contact: Option<String>,
    #[builder(default)]
    pub family_members: Vec<FamilyMember>,
    #[builder(default)]
    pub read_history: Option<BandwidthHistory>,
    #[builder(default)]
    pub write_history: Option<BandwidthHistory>,
    #[builder(default)]
    pub uses_enhanced_dns_logic: bool,
    #[builder(default)]
    pub caches_extra_info: bool,
    #[builder(default)]
    pub extra_info_digest_sha1: Option<String>,
    #[builder(default)]
    pub extra_info_digest_sha256: Option<String>,
    #[builder(default)]
    pub hidden_service_dir: Option<Vec<u32>>,
    #[builder(default)]
    pub allow_single_hop_exits: bool,
    #[builder(default)]
    pub exit_policy: ExitPolicy,
    /// A missing `ipv6-policy` line is equivalent to `reject 1-65535`.
    #[builder(default = "default_ipv6_policy()")]
    pub ipv6_policy: CondensedExitPolicy,
    #[builder(default)]
    pub identity_ed25519: Option<String>,
    #[builder(default)]
    pub master_key_ed25519: Option<String>,
    #[builder(default)]
    pub router_sig_ed25519: Option<String>,
    #[builder(default)]
    pub onion_key_crosscert: Option<String>,
    #[builder(default)]
    pub ntor_onion_key_crosscert: Option<(u8, String)>,
    #[builder(default)]
    pub tunnelled_dir_server: bool,
    #[builder(default)]
    pub bridge_distribution_request: Option<String>,
    #[builder(default)]
    pub overload_general: Option<DateTime<Utc>>,
    #[builder(default)]
    pub router_signature: Option<String>,
    /// Computed for relays, taken from `router-digest` for bridges
    pub digest_sha1: String,
    #[builder(default)]
    pub digest_sha256: Option<String>,
    #[builder(default)]
    pub content: RawContent,
}

fn default_ipv6_policy() -> CondensedExitPolicy {
    CondensedExitPolicy {
        policy_type: ExitPolicyType::Reject,
        entries: vec![crate::netstatus::ExitPolicyEntry::PortRange { min: 1, max: 65535 }],
    }
}

impl ServerDescriptorBuilder {
    fn add_or_address(&mut self, or: OrAddress) {
        self.or_addresses.get_or_insert_with(Vec::new).push(or);
    }

    fn add_exit_policy_rule(&mut self, rule: ExitPolicyRule) {
        self.exit_policy
            .get_or_insert_with(ExitPolicy::default)
            .add_rule(rule);
    }
}

/// Tell bridge from relay descriptors by their `@type` annotation, falling
/// back to the presence of a `router-digest` line
pub(crate) fn detect_publisher(doc: &Document) -> Publisher {
    let annotated = doc
        .annotations()
        .iter()
        .any(|a| a.starts_with("@type bridge-server-descriptor"));
    if annotated || doc.items.iter().any(|i| i.keyword() == "router-digest") {
        Publisher::Bridge
    } else {
        Publisher::Relay
    }
}

fn parse_family(item: &Item) -> Result<Vec<FamilyMember>, DocumentParseError> {
    let line = item.line();
    item.args()
        .into_iter()
        .map(|x| match x.strip_prefix('$') {
            // `$fingerprint`, optionally followed by `=nickname` or `~nickname`
            Some(rest) => {
                let hex = rest.split(['=', '~']).next().unwrap_or(rest);
                Ok(FamilyMember::Fingerprint(fields::parse_hex_fingerprint(hex, line)?))
            }
            None => Ok(FamilyMember::Nickname(fields::parse_nickname(x, line)?)),
        })
        .collect()
}

impl ServerDescriptor {
    /// Parse a single server descriptor, detecting whether it is a bridge's.
    pub fn from_bytes(raw: &[u8], options: &ParseOptions) -> Result<ServerDescriptor, DocumentParseError> {
        let doc = Document::parse_single(raw)?;
        let publisher = detect_publisher(&doc);
        Self::from_doc(doc, publisher, options)
    }

    /// Parse several descriptors contained in one blob.
    pub fn parse_all(raw: &[u8], options: &ParseOptions) -> Result<Vec<ServerDescriptor>, DocumentParseError> {
        Document::parse_many(raw, START_KEYWORD)?
            .into_iter()
            .map(|doc| {
                let publisher = detect_publisher(&doc);
                Self::from_doc(doc, publisher, options)
            })
            .collect()
    }

    /// Parse a descriptor from an already-parsed Tor meta document
    pub(crate) fn from_doc(
        doc: Document,
        publisher: Publisher,
        options: &ParseOptions,
    ) -> Result<ServerDescriptor, DocumentParseError> {
        let rules = match publisher {
            Publisher::Relay => RELAY_RULES,
            Publisher::Bridge => BRIDGE_RULES,
        };
        rules.check_items(&doc.items, doc.fragment())?;

        let mut builder = ServerDescriptorBuilder::default();
        builder.publisher(publisher);
        let mut unrecognized = UnrecognizedLines::new(options);
        let mut declared_sha1 = None;
        let mut declared_sha256 = None;

        for item in doc.items.iter() {
            let line = item.line();
            match item.keyword() {
                "router" => {
                    // nickname address ORPort SOCKSPort DirPort
                    let args = item.args_exactly(5)?;
                    builder.nickname(fields::parse_nickname(args[0], line)?);
                    builder.address(IpAddr::V4(fields::parse_ipv4(args[1], line)?));
                    builder.or_port(fields::parse_port(args[2], line)?);
                    builder.socks_port(fields::parse_port(args[3], line)?);
                    builder.dir_port(fields::parse_port(args[4], line)?);
                }
                "bandwidth" => {
                    let args = item.args_at_least(3)?;
                    builder.bandwidth_avg(fields::parse_int(args[0], line)?);
                    builder.bandwidth_burst(fields::parse_int(args[1], line)?);
                    builder.bandwidth_observed(fields::parse_int(args[2], line)?);
                }
                "published" => {
                    builder.published(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "platform" => {
                    builder.platform(item.arguments().map(str::to_string));
                }
                "proto" => {
                    builder.protocols(parse_protocols(&item.args(), line)?);
                }
                "protocols" => {
                    builder.legacy_protocols(Some(item.get_argument()?.to_string()));
                }
                "fingerprint" => {
                    builder.fingerprint(Some(fields::parse_spaced_fingerprint(&item.args(), line)?));
                }
                "hibernating" => {
                    builder.hibernating(fields::parse_bool(item.args_exactly(1)?[0], line)?);
                }
                "uptime" => {
                    builder.uptime(Some(fields::parse_int(item.args_exactly(1)?[0], line)?));
                }
                "onion-key" => {
                    // newer descriptors omit the legacy RSA key block
                    if let Some(object) = &item.object {
                        builder.onion_key(Some(object.text.clone()));
                    }
                }
                "signing-key" => {
                    builder.signing_key(Some(item.object_labeled("RSA PUBLIC KEY")?.text.clone()));
                }
                "ntor-onion-key" => {
                    let key = fields::parse_base64(item.args_exactly(1)?[0], line)?;
                    builder.ntor_onion_key(Some(key));
                }
                "contact" => {
                    builder.contact(Some(item.arguments().unwrap_or("").to_string()));
                }
                "family" => {
                    builder.family_members(parse_family(item)?);
                }
                "read-history" => {
                    builder.read_history(Some(BandwidthHistory::parse(&item.args(), line)?));
                }
                "write-history" => {
                    builder.write_history(Some(BandwidthHistory::parse(&item.args(), line)?));
                }
                "eventdns" => {
                    builder.uses_enhanced_dns_logic(fields::parse_bool(item.args_exactly(1)?[0], line)?);
                }
                "caches-extra-info" => {
                    item.no_arguments()?;
                    builder.caches_extra_info(true);
                }
                "extra-info-digest" => {
                    let args = item.args_at_least(1)?;
                    builder.extra_info_digest_sha1(Some(fields::parse_hex_digest(args[0], line)?));
                    if let Some(sha256) = args.get(1) {
                        let sha256 = fields::parse_b64_digest256(sha256, line)?;
                        builder.extra_info_digest_sha256(Some(sha256));
                    }
                }
                "hidden-service-dir" => {
                    let versions = item
                        .args()
                        .into_iter()
                        .map(|v| fields::parse_int(v, line))
                        .collect::<Result<Vec<u32>, _>>()?;
                    // no versions listed means version 2
                    let versions = if versions.is_empty() { vec![2] } else { versions };
                    builder.hidden_service_dir(Some(versions));
                }
                "allow-single-hop-exits" => {
                    item.no_arguments()?;
                    builder.allow_single_hop_exits(true);
                }
                "accept" => {
                    builder.add_exit_policy_rule(exit::parse_exit_policy_rule(item, ExitPolicyType::Accept)?);
                }
                "reject" => {
                    builder.add_exit_policy_rule(exit::parse_exit_policy_rule(item, ExitPolicyType::Reject)?);
                }
                "ipv6-policy" => {
                    let policy = item
                        .get_argument()?
                        .parse::<CondensedExitPolicy>()
                        .map_err(|_| DocumentParseError::PolicyParseError(line.to_string()))?;
                    builder.ipv6_policy(policy);
                }
                "or-address" => {
                    let (ip, port) = fields::parse_address_port(item.args_exactly(1)?[0], line)?;
                    builder.add_or_address(OrAddress { ip, port });
                }
                "identity-ed25519" => {
                    item.no_arguments()?;
                    builder.identity_ed25519(Some(item.object_labeled("ED25519 CERT")?.text.clone()));
                }
                "master-key-ed25519" => {
                    let key = fields::parse_base64(item.args_exactly(1)?[0], line)?;
                    builder.master_key_ed25519(Some(key));
                }
                "router-sig-ed25519" => {
                    let sig = fields::parse_base64(item.args_exactly(1)?[0], line)?;
                    builder.router_sig_ed25519(Some(sig));
                }
                "onion-key-crosscert" => {
                    builder.onion_key_crosscert(Some(item.object_labeled("CROSSCERT")?.text.clone()));
                }
                "ntor-onion-key-crosscert" => {
                    let sign: u8 = fields::parse_int(item.args_exactly(1)?[0], line)?;
                    if sign > 1 {
                        return Err(DocumentParseError::illegal(line, "sign bit must be 0 or 1"));
                    }
                    let cert = item.object_labeled("ED25519 CERT")?.text.clone();
                    builder.ntor_onion_key_crosscert(Some((sign, cert)));
                }
                "tunnelled-dir-server" => {
                    item.no_arguments()?;
                    builder.tunnelled_dir_server(true);
                }
                "bridge-distribution-request" => {
                    builder.bridge_distribution_request(Some(item.args_exactly(1)?[0].to_string()));
                }
                "overload-general" => {
                    let args = item.args_exactly(3)?;
                    if args[0] != "1" {
                        return Err(DocumentParseError::illegal(line, "unknown overload-general version"));
                    }
                    builder.overload_general(Some(fields::parse_timestamp_args(args[1], args[2], line)?));
                }
                "router-digest" => {
                    declared_sha1 = Some(fields::parse_hex_digest(item.args_exactly(1)?[0], line)?);
                }
                "router-digest-sha256" => {
                    declared_sha256 = Some(fields::parse_b64_digest256(item.args_exactly(1)?[0], line)?);
                }
                "router-signature" => {
                    item.no_arguments()?;
                    builder.router_signature(Some(item.object_labeled("SIGNATURE")?.text.clone()));
                }
                _ => unrecognized.record(item)?,
            }
        }

        builder.digest_sha1(digest::resolve(declared_sha1, doc.raw(), &DIGEST_SHA1)?);
        builder.digest_sha256(match declared_sha256 {
            Some(declared) => Some(digest::resolve(Some(declared), doc.raw(), &DIGEST_SHA256)?),
            None if publisher == Publisher::Relay => digest::compute(doc.raw(), &DIGEST_SHA256).ok(),
            None => None,
        });
        builder.content(doc.into_content(unrecognized));

        builder
            .build()
            .map_err(|e| DocumentParseError::Incomplete(Box::new(e)))
    }

    pub fn is_bridge(&self) -> bool {
        self.publisher == Publisher::Bridge
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const RELAY: &str = "@type server-descriptor 1.0
router moria1 128.31.0.34 9101 0 9131
identity-ed25519
-----BEGIN ED25519 CERT-----
AQQABp6xAb2+
-----END ED25519 CERT-----
master-key-ed25519 5q7Nl9SuiBJmqDRBbdy3g0+Tq6nRBzZ2GO5QUeUfnAw
platform Tor 0.4.2.7 on Linux
proto Cons=1-2 Desc=1-2 DirCache=1-2 HSDir=1-2 HSIntro=3-4 HSRend=1-2 Link=1-5 LinkAuth=1,3 Microdesc=1-2 Relay=1-2
published 2020-05-01 10:53:47
fingerprint 9695 DFC3 5FFE B861 329B 9F1A B04C 4639 7020 CE31
uptime 1734016
bandwidth 512000 62914560 2133940
extra-info-digest 2AF0F5AAB8D2FBEDA1E3E5D8B5F72836DA0DD3BC R4lphW+QHnNTlxPQCpHLyeYE5qR3AJ6Y8Fz34O1HDTw
onion-key
-----BEGIN RSA PUBLIC KEY-----
MIGJAoGBAKHf
-----END RSA PUBLIC KEY-----
signing-key
-----BEGIN RSA PUBLIC KEY-----
MIGJAoGBALtk
-----END RSA PUBLIC KEY-----
onion-key-crosscert
-----BEGIN CROSSCERT-----
CcUdvWb38Bq
-----END CROSSCERT-----
ntor-onion-key-crosscert 0
-----BEGIN ED25519 CERT-----
AQoABp6xAeYy
-----END ED25519 CERT-----
hidden-service-dir
contact 1024D/28988BF5 arma mit edu
family $0AA4D94FE1D20C4C9B5B3AF52FDB8B54F9A81E1B=alice bob
ntor-onion-key ARsYkHAVdAEjXQr0gJS7sm3cF/Yc1BbFjMwTTUzpKxw
reject 0.0.0.0/8:*
reject 10.0.0.0/8:*
accept *:80
accept *:443
reject *:*
ipv6-policy accept 80,443
tunnelled-dir-server
router-sig-ed25519 Ywp0oWQ4+4oX4GHZkdxDzt3Yn9xT6M2hQb1Lhg6PgLFYD9e9gJ5XhQz2GUt0qOrPnhRpyjvkKDYDHnlzWBpxBQ
router-signature
-----BEGIN SIGNATURE-----
hNhjQpu9jwKg
-----END SIGNATURE-----
";

    pub(crate) const BRIDGE: &str = "@type bridge-server-descriptor 1.2
router Unnamed 10.204.141.58 443 0 0
or-address [fd9f:2e19:3bcf::4a:1e5e]:443
platform Tor 0.2.4.10-alpha on Linux
published 2013-03-05 12:07:12
fingerprint 0029 C6F9 EE7A 1DCC 1C68 F3A6 0D89 4B78 3A1F 8AD3
uptime 1920
bandwidth 1048576 1048576 125440
extra-info-digest 77AB5F2A7A4C6A0E0E1B7E5B0A7C2EE4AB0BC4F0
hidden-service-dir
contact somebody
reject *:*
router-digest 5BB6DCC4C7A46F0D1E4B05E8D91E4A4E4E86D8B8
";

    fn parse(raw: &str) -> Result<ServerDescriptor, DocumentParseError> {
        ServerDescriptor::from_bytes(raw.as_bytes(), &ParseOptions::default())
    }

    #[test]
    fn parses_relay_descriptor() {
        let desc = parse(RELAY).unwrap();
        assert_eq!(desc.publisher, Publisher::Relay);
        assert_eq!(desc.nickname, "moria1");
        assert_eq!(desc.or_port, 9101);
        assert_eq!(desc.dir_port, 9131);
        assert_eq!(desc.bandwidth_observed, 2133940);
        assert_eq!(
            desc.fingerprint.unwrap().to_string(),
            "9695DFC35FFEB861329B9F1AB04C46397020CE31"
        );
        assert_eq!(desc.uptime, Some(1734016));
        assert!(desc.protocols[&Protocol::LinkAuth].supports(3));
        assert!(!desc.protocols[&Protocol::LinkAuth].supports(2));
        assert_eq!(desc.hidden_service_dir, Some(vec![2]));
        assert_eq!(desc.family_members.len(), 2);
        assert_eq!(desc.family_members[1], FamilyMember::Nickname("bob".to_string()));
        assert_eq!(desc.exit_policy.rules.len(), 5);
        assert!(desc.exit_policy.allows(&"1.2.3.4".parse().unwrap(), 443));
        assert!(!desc.exit_policy.allows(&"10.2.3.4".parse().unwrap(), 443));
        assert!(desc.ipv6_policy.allows_port(80));
        assert!(desc.tunnelled_dir_server);
        assert_eq!(desc.ntor_onion_key_crosscert.as_ref().unwrap().0, 0);
        assert_eq!(desc.digest_sha1.len(), 40);
        assert_eq!(desc.digest_sha256.as_ref().unwrap().len(), 43);
        assert!(desc.content.unrecognized_lines().is_empty());
    }

    #[test]
    fn relay_digest_covers_signed_part() {
        let desc = parse(RELAY).unwrap();
        let expected = digest::encode(
            &digest::hash(
                &RELAY.as_bytes()[RELAY.find("router ").unwrap()..RELAY.find("router-signature").unwrap() + 17],
                DigestAlgorithm::Sha1,
            ),
            DigestEncoding::HexUpper,
        );
        assert_eq!(desc.digest_sha1, expected);
    }

    #[test]
    fn parses_bridge_descriptor() {
        let desc = parse(BRIDGE).unwrap();
        assert!(desc.is_bridge());
        assert_eq!(desc.digest_sha1, "5BB6DCC4C7A46F0D1E4B05E8D91E4A4E4E86D8B8");
        assert_eq!(desc.digest_sha256, None);
        assert_eq!(desc.or_addresses[0].port, 443);
        assert!(desc.or_addresses[0].ip.is_ipv6());
        // no ipv6-policy line
        assert!(!desc.ipv6_policy.allows_port(443));
        assert!(desc.router_signature.is_none());
    }

    #[test]
    fn declared_digest_must_match() {
        let raw = RELAY.replace(
            "tunnelled-dir-server\n",
            "tunnelled-dir-server\nrouter-digest 5BB6DCC4C7A46F0D1E4B05E8D91E4A4E4E86D8B8\n",
        );
        let doc = Document::parse_single(raw.as_bytes()).unwrap();
        assert!(matches!(
            ServerDescriptor::from_doc(doc, Publisher::Relay, &ParseOptions::default()),
            Err(DocumentParseError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn relay_requires_signature() {
        let end = RELAY.find("router-signature").unwrap();
        assert!(matches!(
            parse(&RELAY[..end]),
            Err(DocumentParseError::KeywordCount { ref keyword, .. }) if keyword == "router-signature"
        ));
    }

    #[test]
    fn duplicate_platform() {
        let raw = RELAY.replace("platform", "platform Tor 0.4.2.7\nplatform");
        assert!(matches!(
            parse(&raw),
            Err(DocumentParseError::KeywordCount { constraint: "at most once", .. })
        ));
    }

    #[test]
    fn opt_prefix_and_unknown_lines() {
        let raw = BRIDGE
            .replace("hidden-service-dir", "opt hidden-service-dir 2 3")
            .replace("contact somebody\n", "contact somebody\nfancy-new-line 42\n");
        let desc = parse(&raw).unwrap();
        assert_eq!(desc.hidden_service_dir, Some(vec![2, 3]));
        assert_eq!(desc.content.unrecognized_lines(), &["fancy-new-line 42".to_string()]);
        assert!(ServerDescriptor::from_bytes(raw.as_bytes(), &ParseOptions::strict()).is_err());
    }

    #[test]
    fn many_descriptors() {
        let raw = format!("{}{}{}", RELAY, BRIDGE, RELAY);
        let descs = ServerDescriptor::parse_all(raw.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(descs.len(), 3);
        assert!(descs[1].is_bridge());
        assert_eq!(descs[0], descs[2]);
        let joined: Vec<u8> = descs.iter().flat_map(|d| d.content.bytes().to_vec()).collect();
        assert_eq!(joined, raw.as_bytes());
    }
}

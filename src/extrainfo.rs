//! Extra-info descriptors, carrying the bandwidth histories and usage
//! statistics of relays and bridges

use std::collections::BTreeMap;

use crate::descriptor::ParseOptions;
use crate::digest::{self, DigestAlgorithm, DigestEncoding, DigestSpec};
use crate::error::DocumentParseError;
use crate::fields::{self, BandwidthHistory, StatsInterval};
use crate::grammar::Rules;
use crate::meta::{Document, Fingerprint, Item, RawContent, UnrecognizedLines};
use crate::server::Publisher;

//
// External dependencies
//
use chrono::{DateTime, Utc};
use derive_builder::Builder;

pub(crate) const START_KEYWORD: &str = "extra-info ";

const STATS_KEYWORDS: &[&str] = &[
    "read-history",
    "write-history",
    "ipv6-read-history",
    "ipv6-write-history",
    "dirreq-read-history",
    "dirreq-write-history",
    "geoip-db-digest",
    "geoip6-db-digest",
    "geoip-start-time",
    "geoip-client-origins",
    "dirreq-stats-end",
    "dirreq-v2-ips",
    "dirreq-v3-ips",
    "dirreq-v2-reqs",
    "dirreq-v3-reqs",
    "dirreq-v2-share",
    "dirreq-v3-share",
    "dirreq-v2-resp",
    "dirreq-v3-resp",
    "dirreq-v2-direct-dl",
    "dirreq-v3-direct-dl",
    "dirreq-v2-tunneled-dl",
    "dirreq-v3-tunneled-dl",
    "entry-stats-end",
    "entry-ips",
    "bridge-stats-end",
    "bridge-ips",
    "bridge-ip-versions",
    "bridge-ip-transports",
    "cell-stats-end",
    "cell-processed-cells",
    "cell-queued-cells",
    "cell-time-in-queue",
    "cell-circuits-per-decile",
    "conn-bi-direct",
    "ipv6-conn-bi-direct",
    "exit-stats-end",
    "exit-kibibytes-written",
    "exit-kibibytes-read",
    "exit-streams-opened",
    "hidserv-stats-end",
    "hidserv-rend-relayed-cells",
    "hidserv-dir-onions-seen",
    "hidserv-v3-stats-end",
    "hidserv-rend-v3-relayed-cells",
    "hidserv-dir-v3-onions-seen",
    "padding-counts",
    "identity-ed25519",
    "master-key-ed25519",
    "router-sig-ed25519",
    "router-digest-sha256",
];

const STATS_DEPENDENCIES: &[(&str, &str)] = &[
    ("dirreq-v3-ips", "dirreq-stats-end"),
    ("dirreq-v3-reqs", "dirreq-stats-end"),
    ("dirreq-v3-resp", "dirreq-stats-end"),
    ("entry-ips", "entry-stats-end"),
    ("bridge-ips", "bridge-stats-end"),
    ("cell-processed-cells", "cell-stats-end"),
    ("exit-streams-opened", "exit-stats-end"),
    ("hidserv-rend-relayed-cells", "hidserv-stats-end"),
    ("hidserv-rend-v3-relayed-cells", "hidserv-v3-stats-end"),
];

const RELAY_RULES: Rules = Rules {
    first: Some("extra-info"),
    last: Some("router-signature"),
    exactly_once: &["extra-info", "published", "router-signature"],
    at_most_once: STATS_KEYWORDS,
    requires: STATS_DEPENDENCIES,
    ..Rules::NONE
};

const BRIDGE_RULES: Rules = Rules {
    first: Some("extra-info"),
    exactly_once: &["extra-info", "published", "router-digest"],
    at_most_once: STATS_KEYWORDS,
    requires: STATS_DEPENDENCIES,
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

/// Connection counts of a `conn-bi-direct` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnBiDirect {
    pub interval: StatsInterval,
    pub below: u64,
    pub read: u64,
    pub write: u64,
    pub both: u64,
}

/// An extrapolated onion service statistic plus its obfuscation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct HidservStat {
    pub value: f64,
    pub parameters: BTreeMap<String, f64>,
}

/// An extra-info descriptor.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(private)]
pub struct ExtraInfoDescriptor {
    pub publisher: Publisher,
    pub nickname: String,
    pub fingerprint: Fingerprint,
    pub published: DateTime<Utc>,
    #[builder(default)]
    pub read_history: Option<BandwidthHistory>,
    #[builder(default)]
    pub write_history: Option<BandwidthHistory>,
    #[builder(default)]
    pub ipv6_read_history: Option<BandwidthHistory>,
    #[builder(default)]
    pub ipv6_write_history: Option<BandwidthHistory>,
    #[builder(default)]
    pub dirreq_read_history: Option<BandwidthHistory>,
    #[builder(default)]
    pub dirreq_write_history: Option<BandwidthHistory>,
    #[builder(default)]
    pub geoip_db_digest: Option<String>,
    #[builder(default)]
    pub geoip6_db_digest: Option<String>,
    #[builder(default)]
    pub geoip_start_time: Option<DateTime<Utc>>,
    #[builder(default)]
    pub geoip_client_origins: BTreeMap<String, i64>,
    #[builder(default)]
    pub dirreq_stats: Option<StatsInterval>,
    /// `dirreq-v2-*`/`dirreq-v3-*` country, response and download maps,
    /// keyed by the keyword without its `dirreq-` prefix
    #[builder(default)]
    pub dirreq: BTreeMap<String, BTreeMap<String, i64>>,
    #[builder(default)]
    pub dirreq_v2_share: Option<f64>,
    #[builder(default)]
    pub dirreq_v3_share: Option<f64>,
    #[builder(default)]
    pub entry_stats: Option<StatsInterval>,
    #[builder(default)]
    pub entry_ips: BTreeMap<String, i64>,
    #[builder(default)]
    pub bridge_stats: Option<StatsInterval>,
    #[builder(default)]
    pub bridge_ips: BTreeMap<String, i64>,
    #[builder(default)]
    pub bridge_ip_versions: BTreeMap<String, i64>,
    #[builder(default)]
    pub bridge_ip_transports: BTreeMap<String, i64>,
    #[builder(default)]
    pub cell_stats: Option<StatsInterval>,
    #[builder(default)]
    pub cell_processed_cells: Vec<f64>,
    #[builder(default)]
    pub cell_queued_cells: Vec<f64>,
    #[builder(default)]
    pub cell_time_in_queue: Vec<f64>,
    #[builder(default)]
    pub cell_circuits_per_decile: Option<u64>,
    #[builder(default)]
    pub conn_bi_direct: Option<ConnBiDirect>,
    #[builder(default)]
    pub ipv6_conn_bi_direct: Option<ConnBiDirect>,
    #[builder(default)]
    pub exit_stats: Option<StatsInterval>,
    #[builder(default)]
    pub exit_kibibytes_written: BTreeMap<String, i64>,
    #[builder(default)]
    pub exit_kibibytes_read: BTreeMap<String, i64>,
    #[builder(default)]
    pub exit_streams_opened: BTreeMap<String, i64>,
    #[builder(default)]
    pub hidserv_stats: Option<StatsInterval>,
    #[builder(default)]
    pub hidserv_rend_relayed_cells: Option<HidservStat>,
    #[builder(default)]
    pub hidserv_dir_onions_seen: Option<HidservStat>,
    #[builder(default)]
    pub hidserv_v3_stats: Option<StatsInterval>,
    #[builder(default)]
    pub hidserv_rend_v3_relayed_cells: Option<HidservStat>,
    #[builder(default)]
    pub hidserv_dir_v3_onions_seen: Option<HidservStat>,
    #[builder(default)]
    pub padding_counts: Option<(StatsInterval, BTreeMap<String, String>)>,
    #[builder(default)]
    pub transports: Vec<String>,
    #[builder(default)]
    pub identity_ed25519: Option<String>,
    #[builder(default)]
    pub master_key_ed25519: Option<String>,
    #[builder(default)]
    pub router_sig_ed25519: Option<String>,
    #[builder(default)]
    pub router_signature: Option<String>,
    pub digest_sha1: String,
    #[builder(default)]
    pub digest_sha256: Option<String>,
    #[builder(default)]
    pub content: RawContent,
}

pub(crate) fn detect_publisher(doc: &Document) -> Publisher {
    let annotated = doc
        .annotations()
        .iter()
        .any(|a| a.starts_with("@type bridge-extra-info"));
    if annotated || doc.items.iter().any(|i| i.keyword() == "router-digest") {
        Publisher::Bridge
    } else {
        Publisher::Relay
    }
}

fn history(item: &Item) -> Result<Option<BandwidthHistory>, DocumentParseError> {
    Ok(Some(BandwidthHistory::parse(&item.args(), item.line())?))
}

/// The end of a statistics interval, with nothing following it
fn stats_end(item: &Item) -> Result<Option<StatsInterval>, DocumentParseError> {
    let (interval, rest) = StatsInterval::parse(&item.args(), item.line())?;
    if !rest.is_empty() {
        return Err(DocumentParseError::illegal(item.line(), "unexpected arguments"));
    }
    Ok(Some(interval))
}

/// A comma-separated `key=int` list, which may be absent entirely
fn comma_map(item: &Item) -> Result<BTreeMap<String, i64>, DocumentParseError> {
    match item.args()[..] {
        [] => Ok(BTreeMap::new()),
        [list] => fields::parse_comma_key_ints(list, item.line()),
        _ => Err(DocumentParseError::illegal(item.line(), "expected one list")),
    }
}

fn comma_decimals(item: &Item) -> Result<Vec<f64>, DocumentParseError> {
    match item.args()[..] {
        [] => Ok(Vec::new()),
        [list] => fields::parse_comma_decimals(list, item.line()),
        _ => Err(DocumentParseError::illegal(item.line(), "expected one list")),
    }
}

fn conn_bi_direct(item: &Item) -> Result<Option<ConnBiDirect>, DocumentParseError> {
    let line = item.line();
    let (interval, rest) = StatsInterval::parse(&item.args(), line)?;
    let counts = match rest[..] {
        [counts] => fields::parse_comma_ints(counts, line)?,
        _ => return Err(DocumentParseError::args_missing(line)),
    };
    let [below, read, write, both] = counts[..] else {
        return Err(DocumentParseError::illegal(line, "expected four counts"));
    };
    let count = |v: i64| {
        u64::try_from(v).map_err(|_| DocumentParseError::illegal(line, "negative count"))
    };
    Ok(Some(ConnBiDirect {
        interval,
        below: count(below)?,
        read: count(read)?,
        write: count(write)?,
        both: count(both)?,
    }))
}

fn hidserv_stat(item: &Item) -> Result<Option<HidservStat>, DocumentParseError> {
    let line = item.line();
    let args = item.args_at_least(1)?;
    let parameters = fields::parse_key_values(&args[1..], line)?
        .into_iter()
        .map(|(k, v)| Ok((k, fields::parse_decimal(&v, line)?)))
        .collect::<Result<_, DocumentParseError>>()?;
    Ok(Some(HidservStat {
        value: fields::parse_decimal(args[0], line)?,
        parameters,
    }))
}

impl ExtraInfoDescriptor {
    pub fn from_bytes(raw: &[u8], options: &ParseOptions) -> Result<Self, DocumentParseError> {
        let doc = Document::parse_single(raw)?;
        let publisher = detect_publisher(&doc);
        Self::from_doc(doc, publisher, options)
    }

    pub fn parse_all(raw: &[u8], options: &ParseOptions) -> Result<Vec<Self>, DocumentParseError> {
        Document::parse_many(raw, START_KEYWORD)?
            .into_iter()
            .map(|doc| {
                let publisher = detect_publisher(&doc);
                Self::from_doc(doc, publisher, options)
            })
            .collect()
    }

    pub(crate) fn from_doc(
        doc: Document,
        publisher: Publisher,
        options: &ParseOptions,
    ) -> Result<Self, DocumentParseError> {
        let rules = match publisher {
            Publisher::Relay => RELAY_RULES,
            Publisher::Bridge => BRIDGE_RULES,
        };
        rules.check_items(&doc.items, doc.fragment())?;

        let mut builder = ExtraInfoDescriptorBuilder::default();
        builder.publisher(publisher);
        let mut unrecognized = UnrecognizedLines::new(options);
        let mut declared_sha1 = None;
        let mut declared_sha256 = None;

        for item in doc.items.iter() {
            let line = item.line();
            let keyword = item.keyword();
            match keyword {
                "extra-info" => {
                    let args = item.args_exactly(2)?;
                    builder.nickname(fields::parse_nickname(args[0], line)?);
                    builder.fingerprint(fields::parse_hex_fingerprint(args[1], line)?);
                }
                "published" => {
                    builder.published(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "read-history" => {
                    builder.read_history(history(item)?);
                }
                "write-history" => {
                    builder.write_history(history(item)?);
                }
                "ipv6-read-history" => {
                    builder.ipv6_read_history(history(item)?);
                }
                "ipv6-write-history" => {
                    builder.ipv6_write_history(history(item)?);
                }
                "dirreq-read-history" => {
                    builder.dirreq_read_history(history(item)?);
                }
                "dirreq-write-history" => {
                    builder.dirreq_write_history(history(item)?);
                }
                "geoip-db-digest" => {
                    builder.geoip_db_digest(Some(fields::parse_hex_digest(item.args_exactly(1)?[0], line)?));
                }
                "geoip6-db-digest" => {
                    builder.geoip6_db_digest(Some(fields::parse_hex_digest(item.args_exactly(1)?[0], line)?));
                }
                "geoip-start-time" => {
                    builder.geoip_start_time(Some(fields::parse_timestamp(item.get_argument()?, line)?));
                }
                "geoip-client-origins" => {
                    builder.geoip_client_origins(comma_map(item)?);
                }
                "dirreq-stats-end" => {
                    builder.dirreq_stats(stats_end(item)?);
                }
                "dirreq-v2-share" => {
                    builder.dirreq_v2_share(Some(fields::parse_percentage(item.args_exactly(1)?[0], line)?));
                }
                "dirreq-v3-share" => {
                    builder.dirreq_v3_share(Some(fields::parse_percentage(item.args_exactly(1)?[0], line)?));
                }
                "dirreq-v2-ips" | "dirreq-v3-ips" | "dirreq-v2-reqs" | "dirreq-v3-reqs"
                | "dirreq-v2-resp" | "dirreq-v3-resp" | "dirreq-v2-direct-dl"
                | "dirreq-v3-direct-dl" | "dirreq-v2-tunneled-dl" | "dirreq-v3-tunneled-dl" => {
                    let key = keyword.trim_start_matches("dirreq-").to_string();
                    builder
                        .dirreq
                        .get_or_insert_with(BTreeMap::new)
                        .insert(key, comma_map(item)?);
                }
                "entry-stats-end" => {
                    builder.entry_stats(stats_end(item)?);
                }
                "entry-ips" => {
                    builder.entry_ips(comma_map(item)?);
                }
                "bridge-stats-end" => {
                    builder.bridge_stats(stats_end(item)?);
                }
                "bridge-ips" => {
                    builder.bridge_ips(comma_map(item)?);
                }
                "bridge-ip-versions" => {
                    builder.bridge_ip_versions(comma_map(item)?);
                }
                "bridge-ip-transports" => {
                    builder.bridge_ip_transports(comma_map(item)?);
                }
                "cell-stats-end" => {
                    builder.cell_stats(stats_end(item)?);
                }
                "cell-processed-cells" => {
                    builder.cell_processed_cells(comma_decimals(item)?);
                }
                "cell-queued-cells" => {
                    builder.cell_queued_cells(comma_decimals(item)?);
                }
                "cell-time-in-queue" => {
                    builder.cell_time_in_queue(comma_decimals(item)?);
                }
                "cell-circuits-per-decile" => {
                    builder.cell_circuits_per_decile(Some(fields::parse_int(item.args_exactly(1)?[0], line)?));
                }
                "conn-bi-direct" => {
                    builder.conn_bi_direct(conn_bi_direct(item)?);
                }
                "ipv6-conn-bi-direct" => {
                    builder.ipv6_conn_bi_direct(conn_bi_direct(item)?);
                }
                "exit-stats-end" => {
                    builder.exit_stats(stats_end(item)?);
                }
                "exit-kibibytes-written" => {
                    builder.exit_kibibytes_written(comma_map(item)?);
                }
                "exit-kibibytes-read" => {
                    builder.exit_kibibytes_read(comma_map(item)?);
                }
                "exit-streams-opened" => {
                    builder.exit_streams_opened(comma_map(item)?);
                }
                "hidserv-stats-end" => {
                    builder.hidserv_stats(stats_end(item)?);
                }
                "hidserv-rend-relayed-cells" => {
                    builder.hidserv_rend_relayed_cells(hidserv_stat(item)?);
                }
                "hidserv-dir-onions-seen" => {
                    builder.hidserv_dir_onions_seen(hidserv_stat(item)?);
                }
                "hidserv-v3-stats-end" => {
                    builder.hidserv_v3_stats(stats_end(item)?);
                }
                "hidserv-rend-v3-relayed-cells" => {
                    builder.hidserv_rend_v3_relayed_cells(hidserv_stat(item)?);
                }
                "hidserv-dir-v3-onions-seen" => {
                    builder.hidserv_dir_v3_onions_seen(hidserv_stat(item)?);
                }
                "padding-counts" => {
                    let (interval, rest) = StatsInterval::parse(&item.args(), line)?;
                    let counts = fields::parse_key_values(&rest, line)?;
                    builder.padding_counts(Some((interval, counts)));
                }
                "transport" => {
                    let transport = item.args_at_least(1)?.join(" ");
                    builder.transports.get_or_insert_with(Vec::new).push(transport);
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

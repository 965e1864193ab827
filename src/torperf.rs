//! Torperf and OnionPerf measurement results, one `KEY=value` line each

use std::collections::BTreeMap;

use crate::descriptor::ParseOptions;
use crate::error::DocumentParseError;
use crate::fields;
use crate::meta::{self, Fingerprint, RawContent};
use crate::split;

//
// External dependencies
//
use chrono::{DateTime, TimeZone, Utc};

const REQUIRED_KEYS: &[&str] = &[
    "SOURCE",
    "FILESIZE",
    "START",
    "SOCKET",
    "CONNECT",
    "NEGOTIATE",
    "REQUEST",
    "RESPONSE",
    "DATAREQUEST",
    "DATARESPONSE",
    "DATACOMPLETE",
    "WRITEBYTES",
    "READBYTES",
];

/// The result of downloading one file through Tor
#[derive(Debug, Clone, PartialEq)]
pub struct TorperfResult {
    /// Name of the measurement setup, e.g. `torperf` or `moria`
    pub source: String,
    pub file_size: u64,
    pub start: DateTime<Utc>,
    pub socket: DateTime<Utc>,
    pub connect: DateTime<Utc>,
    pub negotiate: DateTime<Utc>,
    pub request: DateTime<Utc>,
    pub response: DateTime<Utc>,
    pub data_request: DateTime<Utc>,
    pub data_response: DateTime<Utc>,
    pub data_complete: DateTime<Utc>,
    pub write_bytes: u64,
    pub read_bytes: u64,
    pub did_timeout: Option<bool>,
    /// Time at which 10, 20, ... 90 percent of the payload had arrived
    pub data_percentiles: BTreeMap<u8, DateTime<Utc>>,
    pub launch: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub path: Option<Vec<Fingerprint>>,
    pub build_times: Option<Vec<f64>>,
    pub timeout: Option<u64>,
    pub quantile: Option<f64>,
    pub circ_id: Option<u64>,
    pub used_by: Option<u64>,
    pub endpoint_local: Option<String>,
    pub endpoint_proxy: Option<String>,
    pub endpoint_remote: Option<String>,
    pub hostname_local: Option<String>,
    pub hostname_remote: Option<String>,
    pub source_address: Option<String>,
    pub content: RawContent,
}

/// Parse `1338357901.42` (seconds since the epoch with an optional fraction)
fn parse_epoch_seconds(value: &str, line: &str) -> Result<DateTime<Utc>, DocumentParseError> {
    let invalid = || DocumentParseError::InvalidDate {
        value: value.to_string(),
        line: line.to_string(),
    };
    let (secs, fraction) = value.split_once('.').unwrap_or((value, ""));
    if secs.is_empty()
        || !secs.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }
    let secs: i64 = secs.parse().map_err(|_| invalid())?;
    let nanos = fraction
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(9)
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    Utc.timestamp_opt(secs, nanos).single().ok_or_else(invalid)
}

/// Parse a `$FP,$FP,$FP` circuit path
fn parse_path(value: &str, line: &str) -> Result<Vec<Fingerprint>, DocumentParseError> {
    value
        .split(',')
        .map(|hop| {
            let hex = hop.strip_prefix('$').unwrap_or(hop);
            fields::parse_hex_fingerprint(hex, line)
        })
        .collect()
}

impl TorperfResult {
    /// Parse one result line, possibly preceded by annotations
    pub fn from_bytes(raw: &[u8], options: &ParseOptions) -> Result<Self, DocumentParseError> {
        let (annotations, body_offset) = meta::split_annotations(raw);
        let body = String::from_utf8_lossy(&raw[body_offset..]);
        let line = body.strip_suffix('\n').unwrap_or(&body);
        if line.trim().is_empty() {
            return Err(DocumentParseError::EmptyDocument);
        }
        if line.contains('\n') {
            return Err(DocumentParseError::illegal(line, "expected a single line"));
        }

        let args: Vec<&str> = line.split(' ').filter(|t| !t.is_empty()).collect();
        let mut values = fields::parse_key_values(&args, line)?;
        for key in REQUIRED_KEYS {
            if !values.contains_key(*key) {
                return Err(DocumentParseError::KeywordCount {
                    keyword: key.to_string(),
                    constraint: "exactly once",
                    count: 0,
                    fragment: meta::fragment(line.as_bytes()),
                });
            }
        }

        let mut take = |key: &str| values.remove(key).unwrap_or_default();
        let time = |value: String| parse_epoch_seconds(&value, line);
        let mut result = TorperfResult {
            source: take("SOURCE"),
            file_size: fields::parse_int(&take("FILESIZE"), line)?,
            start: time(take("START"))?,
            socket: time(take("SOCKET"))?,
            connect: time(take("CONNECT"))?,
            negotiate: time(take("NEGOTIATE"))?,
            request: time(take("REQUEST"))?,
            response: time(take("RESPONSE"))?,
            data_request: time(take("DATAREQUEST"))?,
            data_response: time(take("DATARESPONSE"))?,
            data_complete: time(take("DATACOMPLETE"))?,
            write_bytes: fields::parse_int(&take("WRITEBYTES"), line)?,
            read_bytes: fields::parse_int(&take("READBYTES"), line)?,
            did_timeout: None,
            data_percentiles: BTreeMap::new(),
            launch: None,
            used_at: None,
            path: None,
            build_times: None,
            timeout: None,
            quantile: None,
            circ_id: None,
            used_by: None,
            endpoint_local: None,
            endpoint_proxy: None,
            endpoint_remote: None,
            hostname_local: None,
            hostname_remote: None,
            source_address: None,
            content: RawContent::default(),
        };

        let mut unrecognized = Vec::new();
        for (key, value) in values {
            match key.as_str() {
                "DIDTIMEOUT" => result.did_timeout = Some(fields::parse_bool(&value, line)?),
                "LAUNCH" => result.launch = Some(time(value)?),
                "USED_AT" => result.used_at = Some(time(value)?),
                "PATH" => result.path = Some(parse_path(&value, line)?),
                "BUILDTIMES" => result.build_times = Some(fields::parse_comma_decimals(&value, line)?),
                "TIMEOUT" => result.timeout = Some(fields::parse_int(&value, line)?),
                "QUANTILE" => result.quantile = Some(fields::parse_decimal(&value, line)?),
                "CIRC_ID" => result.circ_id = Some(fields::parse_int(&value, line)?),
                "USED_BY" => result.used_by = Some(fields::parse_int(&value, line)?),
                "ENDPOINTLOCAL" => result.endpoint_local = Some(value),
                "ENDPOINTPROXY" => result.endpoint_proxy = Some(value),
                "ENDPOINTREMOTE" => result.endpoint_remote = Some(value),
                "HOSTNAMELOCAL" => result.hostname_local = Some(value),
                "HOSTNAMEREMOTE" => result.hostname_remote = Some(value),
                "SOURCEADDRESS" => result.source_address = Some(value),
                other => match other
                    .strip_prefix("DATAPERC")
                    .and_then(|p| p.parse::<u8>().ok())
                    .filter(|p| p % 10 == 0 && (10..=90).contains(p))
                {
                    Some(percent) => {
                        result.data_percentiles.insert(percent, time(value)?);
                    }
                    None if options.fail_on_unrecognized => {
                        return Err(DocumentParseError::UnrecognizedKeyword {
                            line: format!("{}={}", key, value),
                        })
                    }
                    None => unrecognized.push(format!("{}={}", key, value)),
                },
            }
        }

        result.content = RawContent::new(
            raw.to_vec(),
            annotations.iter().map(|a| a.to_string()).collect(),
            unrecognized,
        );
        Ok(result)
    }

    /// Parse a file of result lines
    pub fn parse_all(raw: &[u8], options: &ParseOptions) -> Result<Vec<Self>, DocumentParseError> {
        split::split_lines(raw)
            .into_iter()
            .map(|range| Self::from_bytes(&raw[range], options))
            .collect()
    }

    /// Time from starting the request until the last byte arrived
    pub fn duration(&self) -> chrono::Duration {
        self.data_complete - self.start
    }

    /// Whether the download finished without timing out
    pub fn is_successful(&self) -> bool {
        self.did_timeout != Some(true) && self.read_bytes >= self.file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT: &str = "BUILDTIMES=0.93,1.32,1.95 CIRC_ID=8 CONNECT=1338357901.42 DATACOMPLETE=1338357902.25 \
DATAPERC10=1338357902.03 DATAPERC90=1338357902.20 DATAREQUEST=1338357901.88 DATARESPONSE=1338357902.02 \
DIDTIMEOUT=0 FILESIZE=51200 LAUNCH=1338357898.83 NEGOTIATE=1338357901.42 \
PATH=$0011BD2485AD45D984EC4159C88FC066E5E3300E,$0091A4CE0B4D1B0C6AF5D48FC3AA2DC57C2D6C25,$00B834117566035736FC6BD4ECE950EACE8E057A \
QUANTILE=0.800000 READBYTES=51269 REQUEST=1338357901.42 RESPONSE=1338357901.88 SOCKET=1338357901.42 \
SOURCE=torperf START=1338357901.42 TIMEOUT=1500 USED_AT=1338357902.25 USED_BY=7 WRITEBYTES=54
";

    #[test]
    fn parses_result() {
        let result = TorperfResult::from_bytes(RESULT.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(result.source, "torperf");
        assert_eq!(result.file_size, 51200);
        assert_eq!(result.read_bytes, 51269);
        assert_eq!(result.did_timeout, Some(false));
        assert_eq!(result.path.as_ref().unwrap().len(), 3);
        assert_eq!(result.build_times.as_ref().unwrap().len(), 3);
        assert_eq!(result.data_percentiles.len(), 2);
        assert_eq!(result.start, Utc.timestamp_opt(1338357901, 420_000_000).unwrap());
        assert_eq!(result.duration(), chrono::Duration::milliseconds(830));
        assert!(result.is_successful());
        assert!(result.content.unrecognized_lines().is_empty());
    }

    #[test]
    fn minimal_result_from_file() {
        let line = "SOURCE=moria FILESIZE=1048576 START=1.5 SOCKET=2 CONNECT=2 NEGOTIATE=2 REQUEST=2 \
RESPONSE=2 DATAREQUEST=2 DATARESPONSE=2 DATACOMPLETE=3 WRITEBYTES=1 READBYTES=0\n";
        let raw = format!("@type torperf 1.0\n{}{}", line, line);
        let results = TorperfResult::parse_all(raw.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content.annotations(), ["@type torperf 1.0"]);
        assert_eq!(results[1].content.bytes(), line.as_bytes());
        assert!(results[0].path.is_none());
        assert!(!results[0].is_successful());
    }

    #[test]
    fn missing_and_duplicate_keys() {
        let raw = RESULT.replace("SOCKET=1338357901.42 ", "");
        assert!(matches!(
            TorperfResult::from_bytes(raw.as_bytes(), &ParseOptions::default()),
            Err(DocumentParseError::KeywordCount { .. })
        ));
        let raw = RESULT.replace("WRITEBYTES=54", "WRITEBYTES=54 READBYTES=1");
        assert!(matches!(
            TorperfResult::from_bytes(raw.as_bytes(), &ParseOptions::default()),
            Err(DocumentParseError::DuplicateEntry { .. })
        ));
    }

    #[test]
    fn unknown_keys() {
        let raw = RESULT.replace("WRITEBYTES=54", "WRITEBYTES=54 ERRORCODE=NONE");
        let result = TorperfResult::from_bytes(raw.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(result.content.unrecognized_lines(), ["ERRORCODE=NONE"]);
        assert!(TorperfResult::from_bytes(raw.as_bytes(), &ParseOptions::strict()).is_err());
    }

    #[test]
    fn bad_timestamps() {
        assert!(parse_epoch_seconds("-5", "").is_err());
        assert!(parse_epoch_seconds("12.x", "").is_err());
        assert!(parse_epoch_seconds("", "").is_err());
        assert_eq!(parse_epoch_seconds("10.", "").unwrap(), Utc.timestamp_opt(10, 0).unwrap());
    }
}

//! Field-level parsers shared by all document decoders.
//!
//! Every parser receives the line it is working on, so that a failure
//! quotes the offending line verbatim.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::{DocumentParseError, ErrorContext};
use crate::meta::Fingerprint;

//
// External dependencies
//
use chrono::{offset::TimeZone, DateTime, NaiveDate, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

lazy_static! {
    static ref TIMESTAMP: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$").unwrap();
    static ref DATE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    static ref NICKNAME: Regex = Regex::new(r"^[0-9a-zA-Z]{1,19}$").unwrap();
    static ref BASE64_DIGEST: Regex = Regex::new(r"^[0-9a-zA-Z+/]+$").unwrap();
}

/// Parse a strict `yyyy-MM-dd HH:mm:ss` UTC timestamp.
pub fn parse_timestamp(value: &str, line: &str) -> Result<DateTime<Utc>, DocumentParseError> {
    let invalid = || DocumentParseError::InvalidDate {
        value: value.to_string(),
        line: line.to_string(),
    };
    if !TIMESTAMP.is_match(value) {
        return Err(invalid());
    }
    let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|_| invalid())?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Parse a timestamp spread over two whitespace-separated arguments.
pub fn parse_timestamp_args(
    date: &str,
    time: &str,
    line: &str,
) -> Result<DateTime<Utc>, DocumentParseError> {
    parse_timestamp(&format!("{date} {time}"), line)
}

/// Parse a strict `yyyy-MM-dd` date.
pub fn parse_date(value: &str, line: &str) -> Result<NaiveDate, DocumentParseError> {
    let invalid = || DocumentParseError::InvalidDate {
        value: value.to_string(),
        line: line.to_string(),
    };
    if !DATE.is_match(value) {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())
}

pub fn parse_hex_fingerprint(value: &str, line: &str) -> Result<Fingerprint, DocumentParseError> {
    Fingerprint::from_str_hex(value).map_err(|_| DocumentParseError::InvalidFingerprint {
        value: value.to_string(),
        line: line.to_string(),
    })
}

pub fn parse_b64_fingerprint(value: &str, line: &str) -> Result<Fingerprint, DocumentParseError> {
    Fingerprint::from_str_b64(value).map_err(|_| DocumentParseError::InvalidBase64 {
        value: value.to_string(),
        line: line.to_string(),
    })
}

/// Parse a fingerprint written as ten space-separated groups of four hex
/// characters, as in server descriptors' `fingerprint` lines.
pub fn parse_spaced_fingerprint(args: &[&str], line: &str) -> Result<Fingerprint, DocumentParseError> {
    if args.len() != 10 || args.iter().any(|a| a.len() != 4) {
        return Err(DocumentParseError::InvalidFingerprint {
            value: args.join(" "),
            line: line.to_string(),
        });
    }
    parse_hex_fingerprint(&args.concat(), line)
}

/// Validate an unpadded base64 SHA-256 digest (43 characters).
pub fn parse_b64_digest256(value: &str, line: &str) -> Result<String, DocumentParseError> {
    let invalid = || DocumentParseError::InvalidBase64 {
        value: value.to_string(),
        line: line.to_string(),
    };
    if value.len() != 43 || !BASE64_DIGEST.is_match(value) {
        return Err(invalid());
    }
    let decoded = base64::decode_config(value, base64::STANDARD_NO_PAD).map_err(|_| invalid())?;
    if decoded.len() != 32 {
        return Err(invalid());
    }
    Ok(value.to_string())
}

/// Validate a 40-character hex digest, returned upper-case.
pub fn parse_hex_digest(value: &str, line: &str) -> Result<String, DocumentParseError> {
    Ok(parse_hex_fingerprint(value, line)?.to_string())
}

/// Validate an unpadded base64 value of any length.
pub fn parse_base64(value: &str, line: &str) -> Result<String, DocumentParseError> {
    base64::decode_config(value.trim_end_matches('='), base64::STANDARD_NO_PAD).map_err(|_| {
        DocumentParseError::InvalidBase64 {
            value: value.to_string(),
            line: line.to_string(),
        }
    })?;
    Ok(value.to_string())
}

pub fn parse_ipv4(value: &str, line: &str) -> Result<Ipv4Addr, DocumentParseError> {
    Ipv4Addr::from_str(value).map_err(|_| DocumentParseError::InvalidIpAddress {
        value: value.to_string(),
        line: line.to_string(),
    })
}

/// Parse an IPv4 address or an IPv6 address, the latter possibly in brackets
pub fn parse_ip(value: &str, line: &str) -> Result<IpAddr, DocumentParseError> {
    let bare = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);
    IpAddr::from_str(bare).map_err(|_| DocumentParseError::InvalidIpAddress {
        value: value.to_string(),
        line: line.to_string(),
    })
}

pub fn parse_port(value: &str, line: &str) -> Result<u16, DocumentParseError> {
    u16::from_str_radix(value, 10).map_err(|_| DocumentParseError::InvalidNumber {
        kind: "port",
        value: value.to_string(),
        line: line.to_string(),
    })
}

/// Parse `address:port` with an IPv4 address or a bracketed IPv6 address
pub fn parse_address_port(value: &str, line: &str) -> Result<(IpAddr, u16), DocumentParseError> {
    let (address, port) = value
        .rsplit_once(':')
        .ok_or_else(|| DocumentParseError::InvalidIpAddress {
            value: value.to_string(),
            line: line.to_string(),
        })?;
    if address.contains(':') && !address.starts_with('[') {
        return Err(DocumentParseError::InvalidIpAddress {
            value: value.to_string(),
            line: line.to_string(),
        });
    }
    Ok((parse_ip(address, line)?, parse_port(port, line)?))
}

pub fn parse_nickname(value: &str, line: &str) -> Result<String, DocumentParseError> {
    if !NICKNAME.is_match(value) {
        return Err(DocumentParseError::InvalidNickname {
            value: value.to_string(),
            line: line.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Parse a `0`/`1` flag such as the argument of `hibernating`
pub fn parse_bool(value: &str, line: &str) -> Result<bool, DocumentParseError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(DocumentParseError::InvalidNumber {
            kind: "boolean",
            value: value.to_string(),
            line: line.to_string(),
        }),
    }
}

/// Parse a decimal integer of any integer type
pub fn parse_int<T: FromStr<Err = std::num::ParseIntError>>(
    value: &str,
    line: &str,
) -> Result<T, DocumentParseError> {
    value
        .parse::<T>()
        .context(format!("'{}' in line '{}'", value, line))
}

pub fn parse_decimal(value: &str, line: &str) -> Result<f64, DocumentParseError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DocumentParseError::InvalidNumber {
            kind: "decimal",
            value: value.to_string(),
            line: line.to_string(),
        }),
    }
}

/// Parse `12.5%` into `0.125`
pub fn parse_percentage(value: &str, line: &str) -> Result<f64, DocumentParseError> {
    let number = value
        .strip_suffix('%')
        .ok_or_else(|| DocumentParseError::InvalidNumber {
            kind: "percentage",
            value: value.to_string(),
            line: line.to_string(),
        })?;
    Ok(parse_decimal(number, line)? / 100.0)
}

/// Parse a fraction in `0.0..=1.0`
pub fn parse_fraction(value: &str, line: &str) -> Result<f64, DocumentParseError> {
    let v = parse_decimal(value, line)?;
    if !(0.0..=1.0).contains(&v) {
        return Err(DocumentParseError::InvalidNumber {
            kind: "fraction",
            value: value.to_string(),
            line: line.to_string(),
        });
    }
    Ok(v)
}

/// Parse whitespace-separated `key=value` arguments, rejecting duplicates
pub fn parse_key_values(args: &[&str], line: &str) -> Result<BTreeMap<String, String>, DocumentParseError> {
    let mut map = BTreeMap::new();
    for arg in args {
        let (k, v) = arg
            .split_once('=')
            .ok_or_else(|| DocumentParseError::InvalidArgumentDict {
                line: line.to_string(),
            })?;
        if k.is_empty() {
            return Err(DocumentParseError::InvalidArgumentDict {
                line: line.to_string(),
            });
        }
        if map.insert(k.to_string(), v.to_string()).is_some() {
            return Err(DocumentParseError::DuplicateEntry {
                key: k.to_string(),
                line: line.to_string(),
            });
        }
    }
    Ok(map)
}

/// Parse whitespace-separated `key=integer` arguments
pub fn parse_key_ints(args: &[&str], line: &str) -> Result<BTreeMap<String, i64>, DocumentParseError> {
    parse_key_values(args, line)?
        .into_iter()
        .map(|(k, v)| Ok((k, parse_int::<i64>(&v, line)?)))
        .collect()
}

/// Parse a comma-separated `key=integer` list such as `us=16,de=8`; an empty
/// string yields an empty map.
pub fn parse_comma_key_ints(value: &str, line: &str) -> Result<BTreeMap<String, i64>, DocumentParseError> {
    let pairs: Vec<&str> = value.split(',').filter(|x| !x.is_empty()).collect();
    parse_key_ints(&pairs, line)
}

/// Parse a comma-separated list of integers; an empty string yields an
/// empty list.
pub fn parse_comma_ints(value: &str, line: &str) -> Result<Vec<i64>, DocumentParseError> {
    value
        .split(',')
        .filter(|x| !x.is_empty())
        .map(|x| parse_int::<i64>(x, line))
        .collect()
}

/// Parse a comma-separated list of decimals
pub fn parse_comma_decimals(value: &str, line: &str) -> Result<Vec<f64>, DocumentParseError> {
    value
        .split(',')
        .filter(|x| !x.is_empty())
        .map(|x| parse_decimal(x, line))
        .collect()
}

/// Longest statistics interval accepted, one year
const MAX_INTERVAL_SECONDS: i64 = 366 * 24 * 60 * 60;

/// Parse `(NSEC s)` into the number of seconds
fn parse_interval(value: &str, unit: &str, line: &str) -> Result<i64, DocumentParseError> {
    let seconds = value
        .strip_prefix('(')
        .filter(|_| unit == "s)")
        .ok_or_else(|| DocumentParseError::illegal(line, "malformed interval"))?;
    let seconds: i64 = parse_int(seconds, line)?;
    if seconds <= 0 {
        return Err(DocumentParseError::illegal(line, "interval must be positive"));
    }
    if seconds > MAX_INTERVAL_SECONDS {
        return Err(DocumentParseError::illegal(line, "interval longer than a year"));
    }
    Ok(seconds)
}

/// The end of a statistics interval and its length, as in
/// `dirreq-stats-end 2012-02-11 00:59:51 (86400 s)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsInterval {
    pub end: DateTime<Utc>,
    pub seconds: i64,
}

impl StatsInterval {
    /// Parse from the arguments `date time (NSEC s) [rest..]`, returning the
    /// remaining arguments.
    pub fn parse<'s>(args: &[&'s str], line: &str) -> Result<(StatsInterval, Vec<&'s str>), DocumentParseError> {
        match args {
            [date, time, interval, unit, rest @ ..] => Ok((
                StatsInterval {
                    end: parse_timestamp_args(date, time, line)?,
                    seconds: parse_interval(interval, unit, line)?,
                },
                rest.to_vec(),
            )),
            _ => Err(DocumentParseError::args_missing(line)),
        }
    }
}

/// A bandwidth history line such as
/// `read-history 2012-02-11 00:59:51 (900 s) 1,2,3`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandwidthHistory {
    pub interval: StatsInterval,
    pub values: Vec<i64>,
}

impl BandwidthHistory {
    pub fn parse(args: &[&str], line: &str) -> Result<BandwidthHistory, DocumentParseError> {
        let (interval, rest) = StatsInterval::parse(args, line)?;
        let values = match rest[..] {
            [] => Vec::new(),
            [values] => parse_comma_ints(values, line)?,
            _ => return Err(DocumentParseError::illegal(line, "unexpected history values")),
        };
        Ok(BandwidthHistory { interval, values })
    }

    /// Bytes per interval, keyed by the end of each interval. Intervals
    /// ending before the representable time range are left out.
    pub fn by_interval_end(&self) -> BTreeMap<DateTime<Utc>, i64> {
        let count = self.values.len() as i64;
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                let back = (count - 1 - i as i64).checked_mul(self.interval.seconds)?;
                let end = self
                    .interval
                    .end
                    .checked_sub_signed(chrono::Duration::try_seconds(back)?)?;
                Some((end, *v))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_timestamps() {
        let ts = parse_timestamp("2012-02-11 00:59:51", "x").unwrap();
        assert_eq!(ts.to_string(), "2012-02-11 00:59:51 UTC");
        assert!(parse_timestamp("2012-2-11 00:59:51", "x").is_err());
        assert!(parse_timestamp("2012-02-30 00:59:51", "x").is_err());
        assert!(parse_timestamp("2012-02-11 24:00:00", "x").is_err());
        assert!(parse_timestamp("2012-02-11T00:59:51", "x").is_err());
    }

    #[test]
    fn nicknames() {
        assert!(parse_nickname("Relay1", "x").is_ok());
        assert!(parse_nickname("a".repeat(19).as_str(), "x").is_ok());
        assert!(parse_nickname("a".repeat(20).as_str(), "x").is_err());
        assert!(parse_nickname("", "x").is_err());
        assert!(parse_nickname("bad-name", "x").is_err());
    }

    #[test]
    fn addresses() {
        let (ip, port) = parse_address_port("[2001:db8::1]:9001", "x").unwrap();
        assert_eq!(ip, "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(port, 9001);
        assert!(parse_address_port("2001:db8::1:9001", "x").is_err());
        assert!(parse_ipv4("256.1.1.1", "x").is_err());
        assert!(parse_port("65536", "x").is_err());
    }

    #[test]
    fn error_quotes_line() {
        let err = parse_port("abc", "router a 1.2.3.4 abc 0 0").unwrap_err();
        assert!(err.to_string().contains("router a 1.2.3.4 abc 0 0"));
    }

    #[test]
    fn key_values() {
        let map = parse_key_ints(&["a=1", "b=-2"], "x").unwrap();
        assert_eq!(map["b"], -2);
        assert!(parse_key_ints(&["a=1", "a=2"], "x").is_err());
        assert!(parse_key_ints(&["a"], "x").is_err());
        assert!(parse_comma_key_ints("", "x").unwrap().is_empty());
        assert_eq!(parse_comma_key_ints("us=16,de=8", "x").unwrap()["us"], 16);
    }

    #[test]
    fn percentages() {
        assert_eq!(parse_percentage("50.000%", "x").unwrap(), 0.5);
        assert!(parse_percentage("50.0", "x").is_err());
    }

    #[test]
    fn histories() {
        let line = "read-history 2012-02-11 00:59:51 (900 s) 10,20";
        let h = BandwidthHistory::parse(&["2012-02-11", "00:59:51", "(900", "s)", "10,20"], line).unwrap();
        assert_eq!(h.interval.seconds, 900);
        assert_eq!(h.values, vec![10, 20]);
        let by_end = h.by_interval_end();
        assert_eq!(by_end.len(), 2);
        assert_eq!(
            *by_end.keys().next().unwrap(),
            parse_timestamp("2012-02-11 00:44:51", "x").unwrap()
        );
        let empty = BandwidthHistory::parse(&["2012-02-11", "00:59:51", "(900", "s)"], line).unwrap();
        assert!(empty.values.is_empty());
        assert!(BandwidthHistory::parse(&["2012-02-11", "00:59:51", "(0", "s)"], line).is_err());
    }

    #[test]
    fn huge_history_intervals() {
        let line = "read-history 2012-02-11 00:59:51 (10000000000000 s) 1,2";
        assert!(BandwidthHistory::parse(&["2012-02-11", "00:59:51", "(10000000000000", "s)", "1,2"], line).is_err());

        let end = parse_timestamp("2012-02-11 00:59:51", "x").unwrap();
        let h = BandwidthHistory {
            interval: StatsInterval {
                end,
                seconds: i64::MAX / 2,
            },
            values: vec![1, 2, 3],
        };
        let by_end = h.by_interval_end();
        assert_eq!(by_end.len(), 1);
        assert_eq!(by_end[&end], 3);
    }
}

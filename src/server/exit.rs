//! Submodule bundling all code for exit policy parsing in server descriptors

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::DocumentParseError;
use crate::meta::Item;
use crate::netstatus::ExitPolicyType;

use ipnet::IpNet;

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum ExitPolicyAddress {
    Wildcard,
    Address(IpNet),
}

impl ExitPolicyAddress {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            ExitPolicyAddress::Wildcard => true,
            ExitPolicyAddress::Address(net) => net.contains(ip),
        }
    }
}

impl fmt::Display for ExitPolicyAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitPolicyAddress::Wildcard => write!(f, "*"),
            ExitPolicyAddress::Address(IpNet::V6(net)) => write!(f, "[{}]/{}", net.addr(), net.prefix_len()),
            ExitPolicyAddress::Address(net) => write!(f, "{}", net),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ExitPortRange {
    Single(u16),
    Interval(u16, u16),
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ExitPolicyPort {
    Wildcard,
    Port(ExitPortRange),
}

impl ExitPolicyPort {
    pub fn contains(&self, port: u16) -> bool {
        match self {
            ExitPolicyPort::Wildcard => true,
            ExitPolicyPort::Port(ExitPortRange::Single(v)) => *v == port,
            ExitPolicyPort::Port(ExitPortRange::Interval(from, to)) => *from <= port && port <= *to,
        }
    }
}

impl fmt::Display for ExitPolicyPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitPolicyPort::Wildcard => write!(f, "*"),
            ExitPolicyPort::Port(ExitPortRange::Single(port)) => write!(f, "{}", port),
            ExitPolicyPort::Port(ExitPortRange::Interval(from, to)) => write!(f, "{}-{}", from, to),
        }
    }
}

/// One `accept`/`reject` line of a server descriptor
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ExitPolicyRule {
    pub ep_type: ExitPolicyType,
    pub address: ExitPolicyAddress,
    pub port: ExitPolicyPort,
}

impl ExitPolicyRule {
    pub fn matches(&self, ip: &IpAddr, port: u16) -> bool {
        self.address.contains(ip) && self.port.contains(port)
    }
}

impl fmt::Display for ExitPolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let keyword = match self.ep_type {
            ExitPolicyType::Accept => "accept",
            ExitPolicyType::Reject => "reject",
        };
        write!(f, "{} {}:{}", keyword, self.address, self.port)
    }
}

/// The full exit policy of a server descriptor, in line order
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct ExitPolicy {
    pub rules: Vec<ExitPolicyRule>,
}

impl ExitPolicy {
    /// Whether a connection to `ip:port` is allowed; the first matching rule
    /// decides, and a policy without a matching rule accepts.
    pub fn allows(&self, ip: &IpAddr, port: u16) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.matches(ip, port))
            .map(|rule| rule.ep_type == ExitPolicyType::Accept)
            .unwrap_or(true)
    }

    pub(super) fn add_rule(&mut self, rule: ExitPolicyRule) {
        self.rules.push(rule);
    }
}

fn parse_exit_policy_address(addr_str: &str) -> Result<ExitPolicyAddress, DocumentParseError> {
    if addr_str == "*" || addr_str == "*4" || addr_str == "*6" {
        return Ok(ExitPolicyAddress::Wildcard);
    }
    let invalid = || DocumentParseError::IpParseError(addr_str.to_string());
    let (addr, prefix) = match addr_str.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (addr_str, None),
    };
    let addr = addr
        .strip_prefix('[')
        .and_then(|a| a.strip_suffix(']'))
        .unwrap_or(addr);
    let addr = addr.parse::<IpAddr>().map_err(|_| invalid())?;
    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
    let prefix = match prefix {
        Some(prefix) => prefix.parse::<u8>().map_err(|_| invalid())?,
        None => max_prefix,
    };
    let network = IpNet::new(addr, prefix).map_err(|_| invalid())?;
    Ok(ExitPolicyAddress::Address(network))
}

pub(super) fn parse_exit_policy_port(port_str: &str) -> Result<ExitPolicyPort, DocumentParseError> {
    match port_str {
        "*" => Ok(ExitPolicyPort::Wildcard),
        _ => Ok(ExitPolicyPort::Port(parse_range(port_str)?)),
    }
}

/// Parse the argument of an `accept` or `reject` line, `address[/mask]:port[-port]`
pub(super) fn parse_exit_policy_rule(
    item: &Item,
    ept: ExitPolicyType,
) -> Result<ExitPolicyRule, DocumentParseError> {
    let arg = item.get_argument()?;
    // IPv6 addresses contain colons themselves
    let (address, port) = arg
        .rsplit_once(':')
        .ok_or_else(|| DocumentParseError::args_missing(item.line()))?;
    Ok(ExitPolicyRule {
        ep_type: ept,
        address: parse_exit_policy_address(address)?,
        port: parse_exit_policy_port(port)?,
    })
}

fn parse_range(input: &str) -> Result<ExitPortRange, DocumentParseError> {
    let parse = |value: &str| {
        u16::from_str(value).map_err(|_| DocumentParseError::RangeParseError(input.to_string()))
    };
    match input.split_once('-') {
        Some((min, max)) => {
            let (min, max) = (parse(min)?, parse(max)?);
            if min > max {
                return Err(DocumentParseError::RangeParseError(input.to_string()));
            }
            Ok(ExitPortRange::Interval(min, max))
        }
        None => Ok(ExitPortRange::Single(parse(input)?)),
    }
}

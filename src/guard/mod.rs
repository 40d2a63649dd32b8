//! Request Guard
//!
//! Enforces a service's access policy, in order: method, bearer token,
//! caller IP allowlist. The first failing check decides the outcome.

use axum::http::HeaderMap;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use subtle::ConstantTimeEq;

use crate::config::{HttpMethod, Settings};
use crate::error::{GatewayError, Result};

const BEARER_PREFIX: &str = "bearer ";

/// One allowlist entry: a single address or an `address/prefix` network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum IpRule {
    Address(IpAddr),
    Network { addr: IpAddr, prefix: u8 },
}

impl IpRule {
    /// Whether the caller address falls under this entry
    ///
    /// IPv4-mapped IPv6 addresses are compared as IPv4.
    #[must_use]
    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        match *self {
            Self::Address(addr) => addr.to_canonical() == ip,
            Self::Network { addr: IpAddr::V4(net), prefix } => match (ip, mask_u32(prefix)) {
                (IpAddr::V4(ip), Some(mask)) => u32::from(net) & mask == u32::from(ip) & mask,
                _ => false,
            },
            Self::Network { addr: IpAddr::V6(net), prefix } => match (ip, mask_u128(prefix)) {
                (IpAddr::V6(ip), Some(mask)) => u128::from(net) & mask == u128::from(ip) & mask,
                _ => false,
            },
        }
    }
}

fn mask_u32(prefix: u8) -> Option<u32> {
    let shift = 32u32.checked_sub(u32::from(prefix))?;
    Some(u32::MAX.checked_shl(shift).unwrap_or(0))
}

fn mask_u128(prefix: u8) -> Option<u128> {
    let shift = 128u32.checked_sub(u32::from(prefix))?;
    Some(u128::MAX.checked_shl(shift).unwrap_or(0))
}

impl FromStr for IpRule {
    type Err = GatewayError;

    /// Parse an entry, storing IPv4-mapped IPv6 entries in IPv4 form
    ///
    /// A mapped network keeps its prefix relative to the IPv4 part, so
    /// `::ffff:10.0.0.0/104` becomes `10.0.0.0/8`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || GatewayError::config_malformed(format!("invalid iplist entry '{s}'"));
        let s = s.trim();
        match s.split_once('/') {
            None => s
                .parse::<IpAddr>()
                .map(|addr| Self::Address(addr.to_canonical()))
                .map_err(|_| invalid()),
            Some((addr, prefix)) => {
                let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
                let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
                let (addr, prefix) = match addr {
                    IpAddr::V4(_) if prefix <= 32 => (addr, prefix),
                    IpAddr::V6(v6) if prefix <= 128 => match v6.to_ipv4_mapped() {
                        Some(v4) => (IpAddr::V4(v4), prefix.checked_sub(96).ok_or_else(invalid)?),
                        None => (addr, prefix),
                    },
                    _ => return Err(invalid()),
                };
                Ok(Self::Network { addr, prefix })
            }
        }
    }
}

impl TryFrom<String> for IpRule {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for IpRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{addr}"),
            Self::Network { addr, prefix } => write!(f, "{addr}/{prefix}"),
        }
    }
}

/// Determine the caller address
///
/// The first `X-Forwarded-For` entry wins over the socket peer. A forwarded
/// entry carrying a port is accepted. `None` when nothing parses.
#[must_use]
pub fn caller_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let ip = match forwarded {
        Some(entry) => entry
            .parse::<IpAddr>()
            .ok()
            .or_else(|| entry.parse::<SocketAddr>().ok().map(|addr| addr.ip()))?,
        None => peer?.ip(),
    };
    Some(ip.to_canonical())
}

/// What the guard needs to know about a request
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub method: HttpMethod,
    pub authorization: Option<&'a str>,
    pub caller_ip: Option<IpAddr>,
}

/// Method, token and allowlist checks
#[derive(Debug, Clone, Copy)]
pub struct RequestGuard {
    strip_bearer_prefix: bool,
}

impl RequestGuard {
    #[must_use]
    pub const fn new(strip_bearer_prefix: bool) -> Self {
        Self { strip_bearer_prefix }
    }

    /// Run all checks against a service's settings
    pub fn check(&self, settings: &Settings, request: &RequestContext<'_>) -> Result<()> {
        if let Some(expected) = settings.method {
            if expected != request.method {
                return Err(GatewayError::method_mismatch(expected.as_str(), request.method.as_str()));
            }
        }

        let presented = request.authorization.map(|value| self.presented_token(value));
        let authorized = presented.is_some_and(|token| {
            bool::from(token.as_bytes().ct_eq(settings.token.as_bytes()))
        });
        if !authorized {
            return Err(GatewayError::AuthFailure);
        }

        if let Some(rules) = &settings.iplist {
            let allowed = request
                .caller_ip
                .is_some_and(|ip| rules.iter().any(|rule| rule.matches(ip)));
            if !allowed {
                let shown = request.caller_ip.map(|ip| ip.to_string()).unwrap_or_default();
                return Err(GatewayError::IpRestricted(shown));
            }
        }

        Ok(())
    }

    fn presented_token<'a>(&self, header: &'a str) -> &'a str {
        if self.strip_bearer_prefix {
            if let Some(prefix) = header.get(..BEARER_PREFIX.len()) {
                if prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
                    return header[BEARER_PREFIX.len()..].trim_start();
                }
            }
        }
        header
    }
}

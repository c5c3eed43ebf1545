use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized page origin: lowercase `scheme://host[:port]`, default ports elided.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Origin {
    /// Parses an origin or a full URL; path, query and fragment are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidOrigin`] when the scheme, host or port is malformed.
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        let (scheme, rest) = split_scheme(raw)?;
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid(format!("bad port in '{raw}'")))?;
                (host, Some(port))
            },
            None => (authority, None),
        };
        let host = host.to_ascii_lowercase();
        if !is_host(&host) {
            return Err(invalid(format!("bad host in '{raw}'")));
        }
        let port = port.filter(|p| default_port(&scheme) != Some(*p));
        Ok(Self { scheme, host, port })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> Option<u16> {
        self.port
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl FromStr for Origin {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Origin {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Origin> for String {
    fn from(value: Origin) -> Self {
        value.to_string()
    }
}

/// Selects the tabs a broadcast is delivered to.
///
/// * `*` matches every origin.
/// * `https://example.com` matches that origin exactly (port included).
/// * `https://*.example.com` matches `example.com` and any of its subdomains.
/// * `*://...` accepts any scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPattern {
    Any,
    Exact(Origin),
    Domain { scheme: Option<String>, domain: String },
}

impl OriginPattern {
    /// # Errors
    ///
    /// Returns [`BusError::InvalidOrigin`] when the pattern is malformed.
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self::Any);
        }
        let (scheme, rest) = match raw.strip_prefix("*://") {
            Some(rest) => (None, rest),
            None => {
                let (scheme, rest) = split_scheme(raw)?;
                (Some(scheme), rest)
            },
        };
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();

        if let Some(domain) = authority.strip_prefix("*.") {
            let domain = domain.to_ascii_lowercase();
            if !is_host(&domain) {
                return Err(invalid(format!("bad wildcard domain in '{raw}'")));
            }
            return Ok(Self::Domain { scheme, domain });
        }
        match scheme {
            Some(_) => Origin::parse(raw).map(Self::Exact),
            None => {
                let domain = authority.to_ascii_lowercase();
                if !is_host(&domain) {
                    return Err(invalid(format!("bad host in '{raw}'")));
                }
                Ok(Self::Domain { scheme: None, domain })
            },
        }
    }

    pub fn matches(&self, origin: &Origin) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == origin,
            Self::Domain { scheme, domain } => {
                scheme.as_deref().is_none_or(|s| s == origin.scheme)
                    && (origin.host == *domain
                        || origin
                            .host
                            .strip_suffix(domain.as_str())
                            .is_some_and(|prefix| prefix.ends_with('.')))
            },
        }
    }
}

impl From<Origin> for OriginPattern {
    fn from(value: Origin) -> Self {
        Self::Exact(value)
    }
}

impl FromStr for OriginPattern {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_scheme(raw: &str) -> Result<(String, &str), BusError> {
    let (scheme, rest) =
        raw.trim().split_once("://").ok_or_else(|| invalid(format!("missing scheme in '{raw}'")))?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-') {
        return Err(invalid(format!("bad scheme in '{raw}'")));
    }
    Ok((scheme.to_ascii_lowercase(), rest))
}

fn is_host(host: &str) -> bool {
    !host.is_empty()
        && !host.starts_with('.')
        && !host.ends_with('.')
        && host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

fn invalid(message: String) -> BusError {
    BusError::InvalidOrigin { message: message.into(), context: None }
}

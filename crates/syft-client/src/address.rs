//! Structured SyftBox addresses.
//!
//! Textual form: `syft://<user>@<domain>/<path>`, each component percent-encoded
//! on its own. Encoding the path as one component means a `/` inside it
//! becomes `%2F`, so parse and format round-trip exactly.

use crate::{Result, SyftError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const SCHEME_PREFIX: &str = "syft://";

/// A `user@domain/path` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyftUrl {
    pub user: String,
    pub domain: String,
    pub path: String,
}

impl SyftUrl {
    /// Build an address from its components, rejecting empty user or domain.
    pub fn new(
        user: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self> {
        let url = Self {
            user: user.into(),
            domain: domain.into(),
            path: path.into(),
        };
        url.validate()?;
        Ok(url)
    }

    /// Parse the textual form.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |message: &str| SyftError::InvalidSyftUrl {
            input: input.to_string(),
            message: message.to_string(),
        };

        let rest = input
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| invalid("missing syft:// scheme"))?;
        let (user, rest) = rest
            .split_once('@')
            .ok_or_else(|| invalid("missing '@' between user and domain"))?;
        let (domain, path) = rest.split_once('/').unwrap_or((rest, ""));

        let decode = |part: &str| {
            urlencoding::decode(part)
                .map(|s| s.into_owned())
                .map_err(|e| invalid(&format!("invalid percent-encoding: {}", e)))
        };

        let url = Self {
            user: decode(user)?,
            domain: decode(domain)?,
            path: decode(path)?,
        };

        if url.user.is_empty() {
            return Err(invalid("user is empty"));
        }
        if url.domain.is_empty() {
            return Err(invalid("domain is empty"));
        }
        Ok(url)
    }

    /// Check the invariants of a hand-built address.
    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() || self.domain.is_empty() {
            return Err(SyftError::InvalidSyftUrl {
                input: self.to_string(),
                message: "user and domain must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// The `user@domain` identity this address belongs to.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.user, self.domain)
    }
}

impl fmt::Display for SyftUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}@{}",
            SCHEME_PREFIX,
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.domain)
        )?;
        if !self.path.is_empty() {
            write!(f, "/{}", urlencoding::encode(&self.path))?;
        }
        Ok(())
    }
}

impl FromStr for SyftUrl {
    type Err = SyftError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SyftUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SyftUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decodes_components() {
        let url = SyftUrl::parse("syft://alice@x.com/a%2Fb").unwrap();
        assert_eq!(url.user, "alice");
        assert_eq!(url.domain, "x.com");
        assert_eq!(url.path, "a/b");
        assert_eq!(url.to_string(), "syft://alice@x.com/a%2Fb");
    }

    #[test]
    fn test_display_encodes_each_component() {
        let url = SyftUrl::new("bob smith", "x.com", "app/rpc/ping").unwrap();
        assert_eq!(url.to_string(), "syft://bob%20smith@x.com/app%2Frpc%2Fping");
        assert_eq!(SyftUrl::parse(&url.to_string()).unwrap(), url);
    }

    #[test]
    fn test_parse_without_path() {
        let url = SyftUrl::parse("syft://alice@x.com").unwrap();
        assert_eq!(url.path, "");
        assert_eq!(url.to_string(), "syft://alice@x.com");
        assert_eq!(SyftUrl::parse(&url.to_string()).unwrap(), url);
    }

    #[test]
    fn test_parse_rejects_empty_user_or_domain() {
        assert!(SyftUrl::parse("syft://@x.com/f").is_err());
        assert!(SyftUrl::parse("syft://alice@/f").is_err());
        assert!(SyftUrl::parse("syft://alice/f").is_err());
        assert!(SyftUrl::parse("http://alice@x.com/f").is_err());
    }

    #[test]
    fn test_new_validates() {
        let err = SyftUrl::new("", "x.com", "f").unwrap_err();
        assert_eq!(err.code(), "INVALID_SYFT_URL");
    }

    #[test]
    fn test_serde_as_string() {
        let url = SyftUrl::new("alice", "x.com", "f").unwrap();
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"syft://alice@x.com/f\"");
        let back: SyftUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, url);
    }
}

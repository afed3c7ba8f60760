//! Caveats: `key=value` restrictions attached to a token, and the
//! default-deny predicate registry that evaluates them at verify time.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// A single `key=value` restriction. Order within a token's caveat list
/// is part of the chain-HMAC signature; duplicate keys narrow the
/// capability rather than overriding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caveat {
    pub key: String,
    pub value: String,
}

impl Caveat {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The exact bytes fed into the chain-HMAC for this caveat.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}={}", self.key, self.value).into_bytes()
    }
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[derive(Debug, Error)]
pub enum CaveatParseError {
    #[error("caveat bytes are not valid utf-8")]
    NotUtf8,
    #[error("caveat '{0}' is missing '='")]
    MissingSeparator(String),
    #[error("caveat key '{0}' is not lowercase ascii")]
    KeyNotLowercaseAscii(String),
}

impl Caveat {
    pub fn parse(bytes: &[u8]) -> Result<Self, CaveatParseError> {
        let s = std::str::from_utf8(bytes).map_err(|_| CaveatParseError::NotUtf8)?;
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| CaveatParseError::MissingSeparator(s.to_string()))?;
        if !key.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            return Err(CaveatParseError::KeyNotLowercaseAscii(key.to_string()));
        }
        Ok(Caveat::new(key, value))
    }
}

/// Context a caveat predicate is evaluated against: the request being
/// authorized and the invoice that funded the token.
pub struct CaveatContext<'a> {
    pub request_capabilities: &'a [String],
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaveatEvalError {
    #[error("caveat '{0}' not satisfied")]
    NotSatisfied(String),
    #[error("unrecognized caveat key '{0}' (default-deny)")]
    UnrecognizedKey(String),
    #[error("malformed value for caveat '{0}'")]
    MalformedValue(String),
}

/// Evaluates one caveat against the request context.
///
/// `services` and `payment_hash` are structural caveats consumed
/// elsewhere (service binding, invoice lookup) and are always considered
/// satisfied here — by the time caveats reach this function those
/// cross-checks have already been performed by the minter's verify path.
/// Any key not explicitly matched is rejected: new caveat types MUST be
/// added here explicitly, never fall through to acceptance.
pub fn evaluate(caveat: &Caveat, ctx: &CaveatContext) -> Result<(), CaveatEvalError> {
    match caveat.key.as_str() {
        "services" => Ok(()),
        "price" => Ok(()),
        "payment_hash" => Ok(()),
        "valid_until" => {
            let deadline: u64 = caveat
                .value
                .parse()
                .map_err(|_| CaveatEvalError::MalformedValue(caveat.key.clone()))?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before unix epoch")
                .as_secs();
            if now <= deadline {
                Ok(())
            } else {
                Err(CaveatEvalError::NotSatisfied(caveat.key.clone()))
            }
        }
        "capabilities" => {
            let required: Vec<&str> = caveat.value.split(',').filter(|s| !s.is_empty()).collect();
            let granted: Vec<&str> = ctx.request_capabilities.iter().map(String::as_str).collect();
            if required.iter().all(|r| granted.contains(r)) {
                Ok(())
            } else {
                Err(CaveatEvalError::NotSatisfied(caveat.key.clone()))
            }
        }
        other => Err(CaveatEvalError::UnrecognizedKey(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let c = Caveat::new("services", "paid:0");
        let parsed = Caveat::parse(&c.to_bytes()).unwrap();
        assert_eq!(c, parsed);
    }

    #[test]
    fn rejects_uppercase_key() {
        assert!(Caveat::parse(b"Services=paid:0").is_err());
    }

    #[test]
    fn unrecognized_caveat_is_default_denied() {
        let c = Caveat::new("future_feature", "on");
        let ctx = CaveatContext {
            request_capabilities: &[],
        };
        assert_eq!(
            evaluate(&c, &ctx),
            Err(CaveatEvalError::UnrecognizedKey("future_feature".into()))
        );
    }

    #[test]
    fn valid_until_in_past_fails() {
        let c = Caveat::new("valid_until", "1");
        let ctx = CaveatContext {
            request_capabilities: &[],
        };
        assert!(evaluate(&c, &ctx).is_err());
    }

    #[test]
    fn valid_until_in_future_passes() {
        let c = Caveat::new("valid_until", "9999999999");
        let ctx = CaveatContext {
            request_capabilities: &[],
        };
        assert!(evaluate(&c, &ctx).is_ok());
    }

    #[test]
    fn capabilities_superset_passes() {
        let c = Caveat::new("capabilities", "read,write");
        let ctx = CaveatContext {
            request_capabilities: &["read".to_string(), "write".to_string(), "admin".to_string()],
        };
        assert!(evaluate(&c, &ctx).is_ok());
    }

    #[test]
    fn capabilities_missing_one_fails() {
        let c = Caveat::new("capabilities", "read,write");
        let ctx = CaveatContext {
            request_capabilities: &["read".to_string()],
        };
        assert!(evaluate(&c, &ctx).is_err());
    }
}

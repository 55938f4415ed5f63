//! Environment variable access with typed defaults.
//!
//! All configuration in the skeleton is read through [`Env`], which is either
//! the live process environment or a fixed map of variables. The map form
//! keeps configuration tests independent of the process environment, which is
//! shared by every test thread.
//!
//! Empty values are treated exactly like unset variables.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

/// Error raised when a required variable is absent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("required environment variable {key} is not set")]
pub struct MissingVar {
    /// Name of the missing variable.
    pub key: String,
}

/// Source of environment variables.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: Option<HashMap<String, String>>,
}

impl Env {
    /// Read from the process environment.
    pub fn process() -> Self {
        Self { vars: None }
    }

    /// Read from a fixed set of variables instead of the process environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Some(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let value = match &self.vars {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Return the variable's value or `default` when unset.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.lookup(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a boolean flag.
    ///
    /// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Any other
    /// value yields `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key).as_deref() {
            Some("true" | "1" | "yes" | "on") => true,
            Some("false" | "0" | "no" | "off") => false,
            _ => default,
        }
    }

    /// Parse the variable with [`FromStr`], falling back to `default` when the
    /// variable is unset or does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.lookup(key) {
            Some(raw) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparsable environment variable");
                    default
                }
            },
            None => default,
        }
    }

    /// Return the variable's value or an error when it is unset.
    pub fn require(&self, key: &str) -> Result<String, MissingVar> {
        self.lookup(key).ok_or_else(|| MissingVar {
            key: key.to_string(),
        })
    }

    /// Whether the variable is set to a non-empty value.
    pub fn is_set(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }
}

//! Host variable aggregation.
//!
//! Each service produces exactly one [`HostVariableMap`] per host. Directives
//! are applied in declaration order and a key may be written once: a second
//! write is a [`BuildError::WriteConflict`], never a silent override.

use std::collections::BTreeMap;

use crate::error::{BuildError, Result};

/// Final per-host, per-service key/value settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVariableMap {
    host: String,
    vars: BTreeMap<String, String>,
}

impl HostVariableMap {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Insert a key, failing if any earlier write already set it.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if self.vars.contains_key(&key) {
            return Err(BuildError::WriteConflict {
                key,
                host: self.host.clone(),
            });
        }
        self.vars.insert(key, value.into());
        Ok(())
    }

    /// Insert only if nothing has written the key yet.
    ///
    /// Returns `true` when the default was applied.
    pub fn insert_default(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.vars.contains_key(key) {
            return false;
        }
        self.vars.insert(key.to_string(), value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_vars(self) -> BTreeMap<String, String> {
        self.vars
    }
}

/// Ordered, duplicate-free list of tokens collected across directives.
///
/// Insertion order is preserved so the joined value is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenList {
    tokens: Vec<String>,
}

impl TokenList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token unless it is already present.
    pub fn push(&mut self, token: impl Into<String>) {
        let token = token.into();
        if !self.tokens.contains(&token) {
            self.tokens.push(token);
        }
    }

    pub fn join(&self, sep: &str) -> String {
        self.tokens.join(sep)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

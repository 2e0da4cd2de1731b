//! Java `.properties` file parser (C11, ambient).
//!
//! The five properties-file CLI flags (`-c/-s/-v/-x/-o`) point at `key=value` files, not
//! JSON/TOML, so config.rs can't lean on serde here. Format: one `key=value` or `key: value` pair
//! per logical line, `#` or `!` starting a comment (only at the start of a line, after trimming
//! leading whitespace), blank lines ignored. Line continuation via a trailing unescaped `\` is not
//! supported — none of the properties files this crate reads need it.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Error;

/// A parsed `.properties` file: an ordered-insensitive key/value map plus typed accessors that
/// turn a missing or malformed key into a [`Error::Config`] rather than a panic.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    /// Parse `text` as a `.properties` file body.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }
            let Some(sep) = trimmed.find([':', '=']) else {
                continue;
            };
            let key = trimmed[..sep].trim();
            let value = trimmed[sep + 1..].trim();
            if key.is_empty() {
                continue;
            }
            values.insert(key.to_string(), value.to_string());
        }
        Self { values }
    }

    /// Read and parse the file at `path`.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let text = tokio::fs::read_to_string(path).await.map_err(|source| {
            Error::Config(format!("could not read properties file {}: {source}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    /// Raw string lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Raw string lookup, erroring if absent.
    pub fn get_required(&self, key: &str) -> Result<&str, Error> {
        self.get(key)
            .ok_or_else(|| Error::Config(format!("missing required property \"{key}\"")))
    }

    /// Parse a key as an integer, erroring if absent or malformed.
    pub fn get_i64(&self, key: &str) -> Result<i64, Error> {
        self.get_required(key)?
            .parse()
            .map_err(|_| Error::Config(format!("property \"{key}\" is not an integer")))
    }

    /// Parse a key as an integer, falling back to `default` if the key is absent.
    pub fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, Error> {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("property \"{key}\" is not an integer"))),
            None => Ok(default),
        }
    }

    /// Parse a key as a duration in seconds, erroring if absent or malformed.
    pub fn get_duration_seconds(&self, key: &str) -> Result<std::time::Duration, Error> {
        let secs = self.get_i64(key)?;
        if secs < 0 {
            return Err(Error::Config(format!("property \"{key}\" must not be negative")));
        }
        Ok(std::time::Duration::from_secs(secs as u64))
    }

    /// Number of parsed key/value pairs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no key/value pairs were parsed.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

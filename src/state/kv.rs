// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Line-oriented `key=value` documents.
//!
//! State records are plain text so that shell and PowerShell actions can
//! produce and consume them without a parsing library, and so a human can
//! `cat` one while debugging. This module only knows about the text format.
//! The typed record lives in [`crate::state`].
//!
//! # Format
//!
//! - One `key=value` pair per line.
//! - Blank lines and lines starting with `#` are ignored.
//! - The first `=` separates key from value, so values may contain `=`.
//! - Trailing `\r` is stripped, so CRLF files written on Windows parse too.
//! - A later duplicate key overrides an earlier one.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Ordered collection of key/value pairs.
///
/// # Invariant
///
/// - No duplicate keys.
/// - Insertion order is preserved for serialization.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KvDocument {
    entries: Vec<(String, String)>,
}

impl KvDocument {
    /// Construct new empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup value of a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set value of a key.
    ///
    /// Replaces the value in place if the key already exists, otherwise
    /// appends a new entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, old)) => *old = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Iterate over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for KvDocument {
    type Err = KvError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut document = KvDocument::new();
        for (index, line) in data.lines().enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or(KvError::MissingSeparator {
                line: index + 1,
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(KvError::EmptyKey { line: index + 1 });
            }

            document.set(key, value.trim());
        }

        Ok(document)
    }
}

impl Display for KvDocument {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (key, value) in self.iter() {
            writeln!(fmt, "{key}={value}")?;
        }

        Ok(())
    }
}

/// Parse error types for `key=value` documents.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    /// A non-comment line has no `=`.
    #[error("line {line}: expected key=value")]
    MissingSeparator { line: usize },

    /// A line has nothing before its `=`.
    #[error("line {line}: empty key")]
    EmptyKey { line: usize },
}

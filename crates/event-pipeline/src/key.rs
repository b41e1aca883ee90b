// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Upload key naming convention.
//!
//! Keys look like `<prefix>/<doc_type>_<job_id>_<suffix>.json`, for example
//! `logs/test_42_20240101T000000.json`. The job id is the whole second underscore-delimited
//! segment and may not contain underscores or slashes; the suffix may contain underscores. The extension is matched case-insensitively.

use regex::Regex;

use crate::errors::{ConfigError, KeyError};

pub const DEFAULT_KEY_PREFIX: &str = "logs";
pub const DEFAULT_DOC_TYPE: &str = "test";
const EXTENSION: &str = ".json";

/// What to do with an arriving key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
    /// Not an upload this pipeline handles
    Ignored,
    /// Under the prefix with the right extension; the job id may or may not be extractable
    Candidate,
}

#[derive(Debug, Clone)]
pub struct KeyConvention {
    prefix: String,
    pattern: Regex,
}

impl Default for KeyConvention {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX, DEFAULT_DOC_TYPE).expect("default key convention is valid")
    }
}

impl KeyConvention {
    pub fn new(prefix: &str, doc_type: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err(ConfigError::Invalid("key prefix cannot be empty".to_string()));
        }
        if doc_type.is_empty() || doc_type.contains(['/', '_']) {
            return Err(ConfigError::Invalid(format!(
                "doc type '{doc_type}' must be non-empty and contain no '/' or '_'"
            )));
        }
        let pattern = Regex::new(&format!(
            r"^{}/{}_(?P<job_id>[^_/]+)_[^/]+(?i:\.json)$",
            regex::escape(prefix),
            regex::escape(doc_type),
        ))
        .map_err(|e| ConfigError::Invalid(format!("invalid key pattern: {e}")))?;

        Ok(Self {
            prefix: format!("{prefix}/"),
            pattern,
        })
    }

    /// Cheap filter applied before any storage call.
    pub fn classify(&self, key: &str) -> KeyMatch {
        let has_extension = key
            .len()
            .checked_sub(EXTENSION.len())
            .and_then(|start| key.get(start..))
            .is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION));
        if key.starts_with(&self.prefix) && has_extension {
            KeyMatch::Candidate
        } else {
            KeyMatch::Ignored
        }
    }

    /// Extracts the job id from a candidate key.
    pub fn job_id(&self, key: &str) -> Result<String, KeyError> {
        self.pattern
            .captures(key)
            .and_then(|caps| caps.name("job_id"))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| KeyError {
                key: key.to_string(),
            })
    }
}

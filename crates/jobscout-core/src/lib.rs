//! Core domain model and URL identity for jobscout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "jobscout-core";

/// Upper bound on the characters kept in a record description.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// The listing platform a crawl targets.
///
/// `host` is the loose substring used while extracting anchors; `url_prefix`
/// is the strict gate applied when aggregating results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPlatform {
    pub host: String,
    pub url_prefix: String,
}

impl TargetPlatform {
    pub fn new(host: impl Into<String>, url_prefix: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn ashby() -> Self {
        Self::new("jobs.ashbyhq.com", "https://jobs.ashbyhq.com")
    }
}

impl Default for TargetPlatform {
    fn default() -> Self {
        Self::ashby()
    }
}

/// Raw anchor data handed over by a page driver for one rendered result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorDescriptor {
    pub href: String,
    pub link_text: String,
    pub parent_text: String,
    pub has_heading_child: bool,
    pub heading_text: String,
}

/// Candidate listing produced by extraction, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub url: String,
    pub title: String,
    pub company: String,
    pub description: String,
    pub search_rank: u32,
}

impl JobRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            company: String::new(),
            description: String::new(),
            search_rank: 1,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// A listing row as owned by the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedJob {
    pub id: i64,
    pub url: String,
    pub url_hash: String,
    pub title: String,
    pub company: String,
    pub description: String,
    pub search_rank: u32,
    pub discovered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Fields overwritten when a known listing is sighted again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRefresh {
    pub title: String,
    pub description: String,
    pub search_rank: u32,
    pub seen_at: DateTime<Utc>,
}

impl JobRefresh {
    pub fn from_record(record: &JobRecord, seen_at: DateTime<Utc>) -> Self {
        Self {
            title: record.title.clone(),
            description: record.description.clone(),
            search_rank: record.search_rank,
            seen_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("cannot derive an identity from an empty url")]
    InvalidInput,
}

/// Lowercases the url and drops a single trailing `/`.
pub fn normalize_url(url: &str) -> Result<String, IdentityError> {
    if url.trim().is_empty() {
        return Err(IdentityError::InvalidInput);
    }
    let lowered = url.to_lowercase();
    Ok(match lowered.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => lowered,
    })
}

/// SHA-256 of a canonical url, hex encoded.
pub fn url_identity(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn url_hash(url: &str) -> Result<String, IdentityError> {
    normalize_url(url).map(|canonical| url_identity(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_lowercases_and_trims_one_slash() {
        assert_eq!(
            normalize_url("https://Jobs.Example.com/Acme/Role/").unwrap(),
            "https://jobs.example.com/acme/role"
        );
        assert_eq!(
            normalize_url("https://jobs.example.com/acme//").unwrap(),
            "https://jobs.example.com/acme/"
        );
    }

    #[test]
    fn identity_ignores_case_and_trailing_slash() {
        let a = url_hash("https://jobs.example.com/Acme/Role").unwrap();
        let b = url_hash("https://jobs.example.com/acme/role/").unwrap();
        let c = url_hash("https://jobs.example.com/acme/role2").unwrap();
        let d = url_hash("https://jobs.example.com/acme/role?ref=x").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn identity_is_stable_sha256_hex() {
        assert_eq!(
            url_identity("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn empty_url_is_rejected() {
        assert_eq!(normalize_url(""), Err(IdentityError::InvalidInput));
        assert_eq!(url_hash("   "), Err(IdentityError::InvalidInput));
    }
}

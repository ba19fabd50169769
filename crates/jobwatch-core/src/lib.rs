//! Core listing schema and identity normalization for jobwatch.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "jobwatch-core";

/// Placeholder written into any field the extractor could not locate.
pub const NOT_FOUND: &str = "Data not found";

/// One scraped listing, shared by the extractor, the store and the notifier.
///
/// Field names are renamed to the column headers of the persisted store so the
/// same type round-trips through CSV without a separate row struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "Job title")]
    pub title: String,
    #[serde(rename = "Posted")]
    pub posted: String,
    #[serde(rename = "Payment info")]
    pub payment_info: String,
    #[serde(rename = "Link")]
    pub link: String,
}

impl JobRecord {
    pub fn new(
        title: impl Into<String>,
        posted: impl Into<String>,
        payment_info: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            posted: posted.into(),
            payment_info: payment_info.into(),
            link: link.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::new(NOT_FOUND, NOT_FOUND, NOT_FOUND, NOT_FOUND)
    }

    pub fn comparison_key(&self) -> ComparisonKey {
        normalize(self)
    }
}

/// Identity of a listing across scrapes. `posted` is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComparisonKey {
    pub title: String,
    pub payment_info: String,
    pub link: String,
}

/// Derive the comparison key: title and payment info are trimmed and
/// lowercased, the link is only trimmed.
pub fn normalize(record: &JobRecord) -> ComparisonKey {
    ComparisonKey {
        title: fold(&record.title),
        payment_info: fold(&record.payment_info),
        link: record.link.trim().to_string(),
    }
}

fn fold(value: &str) -> String {
    value.trim().to_lowercase()
}

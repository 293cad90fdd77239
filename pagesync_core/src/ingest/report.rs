use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::store::Reconciled;

/// One node of the ingestion tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "branch", rename_all = "snake_case")]
pub enum Branch {
    /// Accounts listed by the token at this position of the token list.
    Account { account: usize },
    Page { page_id: String },
    PagePosts { page_id: String },
    Post { page_id: String, post_id: String },
    PostAttachments { page_id: String, post_id: String },
    PostInsights { page_id: String, post_id: String, metric: &'static str },
    PageInsights { page_id: String, metric: &'static str },
    /// One listed item of a leaf listing, by its position in that listing.
    Attachment { page_id: String, post_id: String, index: usize },
    PostInsight {
        page_id: String,
        post_id: String,
        metric: &'static str,
        index: usize,
    },
    PageInsight {
        page_id: String,
        metric: &'static str,
        index: usize,
    },
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account { account } => write!(f, "account #{account}"),
            Self::Page { page_id } => write!(f, "page {page_id}"),
            Self::PagePosts { page_id } => write!(f, "page_posts {page_id}"),
            Self::Post { page_id, post_id } => write!(f, "post {page_id}_{post_id}"),
            Self::PostAttachments { page_id, post_id } => {
                write!(f, "post_attachments {page_id}_{post_id}")
            }
            Self::PostInsights {
                page_id,
                post_id,
                metric,
            } => write!(f, "post_insights {page_id}_{post_id} {metric}"),
            Self::PageInsights { page_id, metric } => {
                write!(f, "page_insights {page_id} {metric}")
            }
            Self::Attachment {
                page_id,
                post_id,
                index,
            } => write!(f, "attachment {page_id}_{post_id} #{index}"),
            Self::PostInsight {
                page_id,
                post_id,
                metric,
                index,
            } => write!(f, "post_insight {page_id}_{post_id} {metric} #{index}"),
            Self::PageInsight {
                page_id,
                metric,
                index,
            } => write!(f, "page_insight {page_id} {metric} #{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchFailure {
    pub branch: Branch,
    pub error: String,
}

/// What one run wrote and which branches failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub created: BTreeMap<&'static str, u64>,
    pub updated: BTreeMap<&'static str, u64>,
    pub failures: Vec<BranchFailure>,
}

impl RunReport {
    pub fn record(&mut self, table: &'static str, outcome: Reconciled) {
        let counts = match outcome {
            Reconciled::Created => &mut self.created,
            Reconciled::Updated => &mut self.updated,
        };
        *counts.entry(table).or_default() += 1;
    }

    pub fn created(&self, table: &str) -> u64 {
        self.created.get(table).copied().unwrap_or(0)
    }

    pub fn updated(&self, table: &str) -> u64 {
        self.updated.get(table).copied().unwrap_or(0)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

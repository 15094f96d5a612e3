// src/analyze/mod.rs
//! Per-post classification: category vocabulary, results and the batch scheduler.

pub mod ai_adapter;
pub mod classify;
pub mod scheduler;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ingest::types::ContentItem;

pub use crate::analyze::classify::{LlmClassifier, PostClassifier};
pub use crate::analyze::scheduler::BatchScheduler;

/// Rationale attached when the classifier call itself failed.
pub const FAILED_RATIONALE: &str = "Failed to analyze post due to an error";
/// Rationale used when the oracle answered but left the explanation out.
pub const MISSING_RATIONALE: &str = "Failed to categorize post";

/// One recognized category: JSON flag key, theme display name, and the
/// one-line guideline the classification prompt shows the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub guideline: String,
}

impl Category {
    pub(crate) fn new(key: &str, display_name: &str, guideline: &str) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            guideline: guideline.to_string(),
        }
    }
}

/// Ordered category vocabulary. Order is the theme output order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategorySet(Vec<Category>);

impl Default for CategorySet {
    fn default() -> Self {
        Self(vec![
            Category::new(
                "solutionRequest",
                "Solution Requests",
                "Posts asking for help, solutions, or ways to solve specific problems",
            ),
            Category::new(
                "painAndAnger",
                "Pain & Anger",
                "Posts expressing frustration, complaints, or negative experiences",
            ),
            Category::new(
                "adviceRequest",
                "Advice Requests",
                "Posts seeking recommendations, guidance, or best practices",
            ),
            Category::new(
                "moneyTalk",
                "Money Talk",
                "Posts discussing finances, costs, pricing, or monetary aspects",
            ),
        ])
    }
}

impl CategorySet {
    /// Empty input falls back to the default vocabulary; repeated keys keep
    /// their first declaration.
    pub fn new(categories: Vec<Category>) -> Self {
        let mut set = Self(categories);
        set.sanitize();
        set
    }

    pub(crate) fn sanitize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.0
            .retain(|c| !c.key.trim().is_empty() && seen.insert(c.key.clone()));
        if self.0.is_empty() {
            *self = Self::default();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|c| c.key == key)
    }
}

/// Multi-label flags plus the model's rationale. Serialized flat:
/// `{"painAndAnger": true, ..., "explanation": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(flatten)]
    pub flags: BTreeMap<String, bool>,
    pub explanation: String,
}

impl ClassificationResult {
    /// All categories false with the given rationale.
    pub fn all_false(categories: &CategorySet, explanation: &str) -> Self {
        Self {
            flags: categories.iter().map(|c| (c.key.clone(), false)).collect(),
            explanation: explanation.to_string(),
        }
    }

    /// Substituted whenever classifying a post failed.
    pub fn safe_default(categories: &CategorySet) -> Self {
        Self::all_false(categories, FAILED_RATIONALE)
    }

    /// Missing keys read as false.
    pub fn is_set(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    /// Keys whose flag is true: declared categories first in `set` order, then
    /// any other set flags in key order.
    pub fn active_keys<'a>(&'a self, set: &'a CategorySet) -> Vec<&'a str> {
        let mut out: Vec<&str> = set
            .iter()
            .filter(|c| self.is_set(&c.key))
            .map(|c| c.key.as_str())
            .collect();
        out.extend(
            self.flags
                .iter()
                .filter(|(k, v)| **v && !set.contains(k))
                .map(|(k, _)| k.as_str()),
        );
        out
    }
}

/// A post together with its classification. Serialized as the post fields
/// plus a `categories` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    #[serde(flatten)]
    pub post: ContentItem,
    pub categories: ClassificationResult,
}

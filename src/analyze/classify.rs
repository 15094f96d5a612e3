//! Single-post classification against the language-model oracle.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::analyze::ai_adapter::{CompletionRequest, DynOracle};
use crate::analyze::{CategorySet, ClassificationResult, MISSING_RATIONALE};
use crate::error::ClassifyError;
use crate::ingest::types::ContentItem;

/// Anything that can tag one post. The batch scheduler absorbs every error.
#[async_trait]
pub trait PostClassifier: Send + Sync {
    async fn classify(&self, post: &ContentItem) -> Result<ClassificationResult, ClassifyError>;
}

/// System prompt listing every category key with its guideline.
pub fn classification_prompt(categories: &CategorySet) -> String {
    let mut fields = String::new();
    let mut guidelines = String::new();
    for c in categories.iter() {
        fields.push_str(&format!("  \"{}\": boolean,\n", c.key));
        if c.guideline.is_empty() {
            guidelines.push_str(&format!("- {}\n", c.display_name));
        } else {
            guidelines.push_str(&format!("- {}: {}\n", c.display_name, c.guideline));
        }
    }
    format!(
        "Analyze the post and categorize it into themes. You must return a JSON object \
with exactly these boolean fields and a string explanation:\n\
{{\n{fields}  \"explanation\": string\n}}\n\n\
Guidelines for categorization:\n{guidelines}\n\
Each boolean field must be explicitly set to true or false. Do not omit any fields.\n\
The explanation should be a brief sentence explaining your categorization."
    )
}

pub fn post_prompt(post: &ContentItem) -> String {
    format!("Title: {}\nContent: {}", post.title, post.content)
}

/// Merge the oracle's JSON over the all-false default.
///
/// Missing category keys stay false and a missing explanation becomes
/// [`MISSING_RATIONALE`]. A non-object payload, a non-boolean category value or
/// a non-string explanation is a schema error. Unknown keys are ignored.
pub fn parse_classification(
    raw: &str,
    categories: &CategorySet,
) -> Result<ClassificationResult, ClassifyError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ClassifyError::Schema(format!("not json: {e}")))?;
    let Value::Object(obj) = value else {
        return Err(ClassifyError::Schema("expected a JSON object".into()));
    };

    let mut result = ClassificationResult::all_false(categories, MISSING_RATIONALE);
    for c in categories.iter() {
        match obj.get(&c.key) {
            None => {}
            Some(Value::Bool(b)) => {
                result.flags.insert(c.key.clone(), *b);
            }
            Some(other) => {
                return Err(ClassifyError::Schema(format!(
                    "field {} is not a boolean: {other}",
                    c.key
                )))
            }
        }
    }
    match obj.get("explanation") {
        None => {}
        Some(Value::String(s)) => result.explanation = s.clone(),
        Some(other) => {
            return Err(ClassifyError::Schema(format!(
                "explanation is not a string: {other}"
            )))
        }
    }
    Ok(result)
}

/// Classifier backed by an [`Oracle`](crate::analyze::ai_adapter::Oracle).
pub struct LlmClassifier {
    oracle: DynOracle,
    categories: CategorySet,
    system_prompt: String,
    temperature: f32,
}

impl LlmClassifier {
    pub fn new(oracle: DynOracle, categories: CategorySet, temperature: f32) -> Self {
        let system_prompt = classification_prompt(&categories);
        Self {
            oracle,
            categories,
            system_prompt,
            temperature,
        }
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }
}

#[async_trait]
impl PostClassifier for LlmClassifier {
    async fn classify(&self, post: &ContentItem) -> Result<ClassificationResult, ClassifyError> {
        let req = CompletionRequest {
            system: self.system_prompt.clone(),
            user: post_prompt(post),
            temperature: self.temperature,
        };
        let raw = self.oracle.complete(&req).await?;
        debug!(provider = self.oracle.provider_name(), title = %post.title, "classification received");
        parse_classification(&raw, &self.categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{MockProvider, ProviderOracle};
    use std::sync::Arc;

    fn post() -> ContentItem {
        ContentItem {
            title: "Billing is broken again".into(),
            content: "I was charged twice".into(),
            score: 10,
            num_comments: 2,
            created_at: chrono::Utc::now(),
            url: "https://www.reddit.com/r/x/comments/1/b/".into(),
        }
    }

    #[test]
    fn prompt_lists_every_category() {
        let p = classification_prompt(&CategorySet::default());
        for key in ["solutionRequest", "painAndAnger", "adviceRequest", "moneyTalk"] {
            assert!(p.contains(&format!("\"{key}\": boolean")), "missing {key}");
        }
        assert!(p.contains("- Pain & Anger: Posts expressing frustration"));
        assert_eq!(post_prompt(&post()), "Title: Billing is broken again\nContent: I was charged twice");
    }

    #[test]
    fn partial_payload_merges_over_default() {
        let set = CategorySet::default();
        let r = parse_classification(r#"{"painAndAnger": true, "extra": 5}"#, &set).unwrap();
        assert!(r.is_set("painAndAnger"));
        assert!(!r.is_set("moneyTalk"));
        assert_eq!(r.flags.len(), 4);
        assert_eq!(r.explanation, MISSING_RATIONALE);
    }

    #[test]
    fn wrong_types_are_schema_errors() {
        let set = CategorySet::default();
        for bad in [
            r#"{"painAndAnger": "yes"}"#,
            r#"{"explanation": 3}"#,
            r#"[true, false]"#,
            "not json",
        ] {
            assert!(
                matches!(parse_classification(bad, &set), Err(ClassifyError::Schema(_))),
                "{bad} should fail"
            );
        }
    }

    #[tokio::test]
    async fn classifier_uses_oracle_reply() {
        let oracle = Arc::new(ProviderOracle(MockProvider {
            fixed: r#"{"painAndAnger":true,"moneyTalk":true,"explanation":"double charge"}"#.into(),
        }));
        let c = LlmClassifier::new(oracle, CategorySet::default(), 0.3);
        let r = c.classify(&post()).await.unwrap();
        assert_eq!(r.active_keys(&CategorySet::default()), vec!["painAndAnger", "moneyTalk"]);
        assert_eq!(r.explanation, "double charge");
    }
}

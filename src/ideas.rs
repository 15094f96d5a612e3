//! Idea synthesis: one oracle call over the whole classified corpus, answers
//! cross-referenced back to posts by index.

use std::collections::HashSet;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyze::ai_adapter::{CompletionRequest, DynOracle};
use crate::analyze::{CategorySet, ClassifiedItem};
use crate::config::pipeline::IdeasCfg;
use crate::error::SynthesisError;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ideas_generated_total", "Ideas returned by synthesis.");
        describe_counter!(
            "ideas_dropped_indices_total",
            "Post indices in synthesis output that did not resolve."
        );
    });
}

const SYSTEM_PROMPT: &str = r#"You are a startup idea generator specializing in AI agents.
Analyze the provided posts and identify patterns of user needs, pain points, and requests.
Generate innovative startup ideas for AI agents that could solve these problems.
Focus on practical, technically feasible solutions that could be built with current AI technology.

For each idea, provide a detailed breakdown in this format:
1. Startup Name: A catchy, memorable name
2. Problem: Clear description of the problem being solved
3. Solution: How the AI agent addresses this problem
4. Key Features:
   - List 3-4 core features
   - Explain how each feature works
5. Technical Feasibility: Why this can be built with current AI technology
6. Business Model: How it could make money
7. Target Users: Who would use this

Return a JSON object with an "ideas" array where each item has:
{
  "ideas": [
    {
      "idea": "The full formatted description following the structure above",
      "postIndices": [0, 1, 2]
    }
  ]
}
"postIndices" lists the [index] of every post that inspired the idea.
Make each idea detailed but concise."#;

/// A synthesized idea and the posts it was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub idea: String,
    pub related_posts: Vec<ClassifiedItem>,
}

#[derive(Debug, Deserialize)]
struct IdeasReply {
    ideas: Vec<IdeaReply>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdeaReply {
    idea: String,
    #[serde(default)]
    post_indices: Vec<i64>,
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

/// Corpus as indexed text blocks; the index is the post's position in `posts`.
/// Categories are listed in the order `categories` declares them.
pub fn corpus_prompt(
    posts: &[ClassifiedItem],
    categories: &CategorySet,
    max_body_chars: usize,
) -> String {
    let mut out = String::from(
        "Here are categorized posts from a subreddit. Generate 3-5 startup ideas for AI agents \
based on the patterns and needs you observe:\n",
    );
    for (i, p) in posts.iter().enumerate() {
        let cats = p.categories.active_keys(categories);
        out.push_str(&format!(
            "\n[{i}]\nTitle: {}\nContent: {}\nCategories: {}\n---\n",
            p.post.title,
            truncate_chars(&p.post.content, max_body_chars),
            cats.join(", ")
        ));
    }
    out
}

/// Indices that resolve into a corpus of `len`, first occurrence kept, plus the
/// number dropped as out of range.
pub fn resolve_indices(raw: &[i64], len: usize) -> (Vec<usize>, usize) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(raw.len());
    let mut dropped = 0;
    for &i in raw {
        match usize::try_from(i) {
            Ok(idx) if idx < len => {
                if seen.insert(idx) {
                    kept.push(idx);
                }
            }
            _ => dropped += 1,
        }
    }
    (kept, dropped)
}

/// Parse the oracle reply and attach related posts.
pub fn parse_ideas(raw: &str, posts: &[ClassifiedItem]) -> Result<Vec<Idea>, SynthesisError> {
    let reply: IdeasReply =
        serde_json::from_str(raw).map_err(|e| SynthesisError::InvalidResponse(e.to_string()))?;

    let mut ideas = Vec::with_capacity(reply.ideas.len());
    for r in reply.ideas {
        let (indices, dropped) = resolve_indices(&r.post_indices, posts.len());
        if dropped > 0 {
            warn!(dropped, corpus = posts.len(), "synthesis referenced unknown posts");
            counter!("ideas_dropped_indices_total").increment(dropped as u64);
        }
        ideas.push(Idea {
            idea: r.idea,
            related_posts: indices.into_iter().map(|i| posts[i].clone()).collect(),
        });
    }
    Ok(ideas)
}

pub struct IdeaSynthesizer {
    oracle: DynOracle,
    temperature: f32,
    max_body_chars: usize,
    categories: CategorySet,
}

impl IdeaSynthesizer {
    pub fn new(oracle: DynOracle, temperature: f32, cfg: &IdeasCfg) -> Self {
        ensure_metrics_described();
        Self {
            oracle,
            temperature,
            max_body_chars: cfg.max_body_chars,
            categories: CategorySet::default(),
        }
    }

    /// Category vocabulary used to order the `Categories:` lines.
    pub fn with_categories(mut self, categories: CategorySet) -> Self {
        self.categories = categories;
        self
    }

    /// Empty corpus yields no ideas without calling the oracle.
    pub async fn generate(&self, posts: &[ClassifiedItem]) -> Result<Vec<Idea>, SynthesisError> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let req = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: corpus_prompt(posts, &self.categories, self.max_body_chars),
            temperature: self.temperature,
        };
        let raw = self.oracle.complete(&req).await?;
        let ideas = parse_ideas(&raw, posts)?;
        counter!("ideas_generated_total").increment(ideas.len() as u64);
        info!(
            provider = self.oracle.provider_name(),
            posts = posts.len(),
            ideas = ideas.len(),
            "ideas synthesized"
        );
        Ok(ideas)
    }
}

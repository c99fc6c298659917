//! Numbering of retrieved excerpts and the prompts built from them.
//!
//! Ordinals are assigned once per query, densely over the records that have a
//! usable excerpt, and the resulting [`CitationMapping`] is the only thing a
//! client needs to resolve `(Article N)` references in the answer.

use crate::models::RetrievalRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const NO_RELEVANT_ARTICLES: &str = "No relevant articles found.";

pub const SYSTEM_PROMPT: &str = "You are a factual news assistant. Your job is to answer questions about news articles.\n\n\
Rules:\n\
1. Use ONLY the information from the provided articles in the CONTEXT.\n\
2. Do NOT invent facts that are not supported by the articles.\n\
3. When you use information from an article, explicitly cite it using this format: (Article N), \
where N is the article number shown in the CONTEXT.\n\
4. If the articles do not contain enough information to fully answer, say so clearly and explain what is missing.\n\
5. Summarize concisely but completely, and group related information together.\n";

/// Ordinal (1-based) to article id for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitationMapping(BTreeMap<usize, i64>);

impl CitationMapping {
    pub fn get(&self, ordinal: usize) -> Option<i64> {
        self.0.get(&ordinal).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.0.iter().map(|(ordinal, id)| (*ordinal, *id))
    }

    /// Article ids in order of their first ordinal, without repeats.
    pub fn distinct_article_ids(&self) -> Vec<i64> {
        let mut seen = HashSet::new();
        self.0
            .values()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NumberedExcerpt {
    pub ordinal: usize,
    pub excerpt: String,
    pub record: RetrievalRecord,
}

#[derive(Debug, Clone, Default)]
pub struct GroundingContext {
    excerpts: Vec<NumberedExcerpt>,
    mapping: CitationMapping,
}

impl GroundingContext {
    pub fn is_empty(&self) -> bool {
        self.excerpts.is_empty()
    }

    pub fn excerpts(&self) -> &[NumberedExcerpt] {
        &self.excerpts
    }

    pub fn mapping(&self) -> &CitationMapping {
        &self.mapping
    }

    pub fn render(&self) -> String {
        let mut lines = vec!["You are given the following news article excerpts:\n".to_string()];
        for item in &self.excerpts {
            let metadata = &item.record.metadata;
            lines.push(format!(
                "  Article {}:\n  Title: {}\n  Source: {}\n  Published at: {}\n  Excerpt:\n  {}\n",
                item.ordinal,
                metadata.title,
                metadata.source,
                metadata.published_at.to_rfc3339(),
                item.excerpt
            ));
        }
        lines.join("\n")
    }

    pub fn user_prompt(&self, question: &str) -> String {
        format!(
            "{}\n\nUser question:\n{}\n\nInstructions:\n\
             - Answer the user's question using ONLY the information from the articles above.\n\
             - When you reference information from an article, cite it like this: (Article N).\n\
             - If you are unsure or the context does not contain enough information, say so explicitly.\n\
             Now provide your answer:\n",
            self.render(),
            question
        )
    }
}

pub struct ContextBuilder;

impl ContextBuilder {
    pub fn build(records: Vec<RetrievalRecord>) -> GroundingContext {
        let mut excerpts = Vec::new();
        let mut mapping = BTreeMap::new();

        for record in records {
            let Some(excerpt) = select_excerpt(&record) else {
                continue;
            };
            let ordinal = excerpts.len() + 1;
            mapping.insert(ordinal, record.article_id);
            excerpts.push(NumberedExcerpt {
                ordinal,
                excerpt,
                record,
            });
        }

        GroundingContext {
            excerpts,
            mapping: CitationMapping(mapping),
        }
    }
}

/// Document text, then the stored snippet, then raw article content.
fn select_excerpt(record: &RetrievalRecord) -> Option<String> {
    [
        Some(record.document.as_str()),
        Some(record.snippet.as_str()),
        record.content.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|text| !text.is_empty())
    .map(str::to_string)
}

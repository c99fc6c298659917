use crate::models::{RagSettings, RetrievalRecord};
use std::collections::HashSet;

struct Topic {
    category: &'static str,
    keywords: &'static [&'static str],
    related: &'static [&'static str],
}

static TOPICS: [Topic; 7] = [
    Topic {
        category: "technology",
        keywords: &[
            "technology", "tech", "ai", "artificial intelligence", "software", "hardware",
            "startup", "apple", "google", "microsoft", "chip", "chips", "semiconductor",
            "smartphone", "cybersecurity", "programming", "computer", "internet", "robot",
        ],
        related: &["technology", "software", "AI", "innovation", "tech industry"],
    },
    Topic {
        category: "sports",
        keywords: &[
            "sport", "sports", "football", "soccer", "cricket", "basketball", "tennis", "nba",
            "nfl", "match", "tournament", "olympics", "league", "championship", "baseball", "golf",
        ],
        related: &["sports", "match", "tournament", "team", "league"],
    },
    Topic {
        category: "business",
        keywords: &[
            "business", "market", "markets", "stock", "stocks", "economy", "economic", "finance",
            "company", "earnings", "investor", "investors", "bank", "trade", "inflation",
            "revenue", "merger", "ipo",
        ],
        related: &["business", "markets", "economy", "companies", "finance"],
    },
    Topic {
        category: "science",
        keywords: &[
            "science", "research", "space", "nasa", "climate", "physics", "biology",
            "scientist", "scientists", "astronomy",
        ],
        related: &["science", "research", "discovery", "scientists"],
    },
    Topic {
        category: "health",
        keywords: &[
            "health", "medical", "vaccine", "disease", "hospital", "covid", "doctor", "medicine",
            "drug", "wellness",
        ],
        related: &["health", "medicine", "healthcare", "patients"],
    },
    Topic {
        category: "politics",
        keywords: &[
            "politics", "election", "government", "minister", "parliament", "president",
            "senate", "policy", "vote", "congress",
        ],
        related: &["politics", "government", "election", "policy"],
    },
    Topic {
        category: "entertainment",
        keywords: &[
            "entertainment", "movie", "film", "music", "celebrity", "tv", "television", "album",
            "box office", "streaming",
        ],
        related: &["entertainment", "film", "music", "celebrity"],
    },
];

/// The question as it will be embedded, plus the category filter to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery {
    pub embedding_text: String,
    pub category: Option<String>,
    pub category_inferred: bool,
}

/// Lowercased words joined by single spaces and padded, so a keyword can be
/// matched on word boundaries with `contains(" kw ")`.
fn word_line(text: &str) -> String {
    let words = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    format!(" {} ", words.join(" "))
}

fn mentions(line: &str, phrase: &str) -> bool {
    line.contains(&format!(" {} ", phrase.to_lowercase()))
}

fn topic(category: &str) -> Option<&'static Topic> {
    TOPICS
        .iter()
        .find(|topic| topic.category.eq_ignore_ascii_case(category.trim()))
}

/// Topic with the most keyword hits; ties go to the earlier topic.
pub fn infer_category(question: &str) -> Option<&'static str> {
    let line = word_line(question);
    let mut best: Option<(&'static str, usize)> = None;

    for topic in &TOPICS {
        let hits = topic
            .keywords
            .iter()
            .filter(|keyword| mentions(&line, keyword))
            .count();
        if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
            best = Some((topic.category, hits));
        }
    }

    best.map(|(category, _)| category)
}

/// Appends the topic's related terms that the question doesn't already use.
pub fn expand_query(question: &str, category: &str) -> String {
    let Some(topic) = topic(category) else {
        return question.to_string();
    };

    let line = word_line(question);
    let extra = topic
        .related
        .iter()
        .filter(|term| !mentions(&line, term))
        .copied()
        .collect::<Vec<_>>();

    if extra.is_empty() {
        question.to_string()
    } else {
        format!("{} {}", question.trim_end(), extra.join(" "))
    }
}

pub fn prepare_query(question: &str, explicit_category: Option<&str>, settings: &RagSettings) -> PreparedQuery {
    let explicit = explicit_category
        .map(str::trim)
        .filter(|category| !category.is_empty())
        .map(str::to_string);

    let (category, category_inferred) = match explicit {
        Some(category) => (Some(category), false),
        None if settings.infer_category => match infer_category(question) {
            Some(category) => (Some(category.to_string()), true),
            None => (None, false),
        },
        None => (None, false),
    };

    let embedding_text = match (&category, settings.expand_query) {
        (Some(category), true) => expand_query(question, category),
        _ => question.to_string(),
    };

    PreparedQuery {
        embedding_text,
        category,
        category_inferred,
    }
}

/// Category-filtered hits first, then unfiltered hits for articles not yet
/// seen, stopping at `top_k`. Each article appears at most once.
pub fn merge_with_fallback(
    filtered: Vec<RetrievalRecord>,
    unfiltered: Vec<RetrievalRecord>,
    top_k: usize,
) -> Vec<RetrievalRecord> {
    let mut seen = HashSet::new();
    filtered
        .into_iter()
        .chain(unfiltered)
        .filter(|record| seen.insert(record.article_id))
        .take(top_k)
        .collect()
}

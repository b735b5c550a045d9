//! Schema ranker
//!
//! Scores tables against the user question and returns the top-N table keys.
//! Two modes: an ad-hoc TF-IDF fit over the snapshot, or a precomputed
//! vectorizer loaded from disk (with a column-name overlap boost). Ties keep
//! snapshot order; an empty schema ranks to an empty list.

use crate::config::SchemaConfig;
use crate::models::schema::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Subset of English stop words matching the vectorizer used to build
/// precomputed stores.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my", "no",
    "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "out",
    "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "you", "your", "yours",
];

/// TF-IDF vectorizer over a fixed vocabulary.
///
/// Fitting matches the conventions of the store-building tooling: word tokens
/// of length >= 2, stop-word removal, smoothed idf, L2-normalized vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfModel {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfModel {
    pub fn fit(documents: &[String]) -> Self {
        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d)).collect();

        let terms: BTreeSet<&String> = tokenized.iter().flatten().collect();
        let vocabulary: HashMap<String, usize> =
            terms.into_iter().cloned().zip(0usize..).collect();

        let mut document_frequency = vec![0usize; vocabulary.len()];
        for tokens in &tokenized {
            let unique: BTreeSet<&String> = tokens.iter().collect();
            for term in unique {
                if let Some(&idx) = vocabulary.get(term) {
                    document_frequency[idx] += 1;
                }
            }
        }

        let n = documents.len() as f64;
        let idf = document_frequency
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        Self { vocabulary, idf }
    }

    /// Transform text into an L2-normalized tf-idf vector.
    pub fn transform(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.vocabulary.len()];
        for token in tokenize(text) {
            if let Some(&idx) = self.vocabulary.get(&token) {
                vector[idx] += self.idf[idx];
            }
        }
        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            push_token(&mut tokens, std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, current);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, token: String) {
    if token.chars().count() >= 2 && !STOP_WORDS.contains(&token.as_str()) {
        tokens.push(token);
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Precomputed vectorizer produced by the offline embedding tooling.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingStore {
    pub vectorizer: TfidfModel,
}

impl EmbeddingStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

pub struct SchemaRanker {
    cfg: SchemaConfig,
    store: Option<EmbeddingStore>,
}

impl SchemaRanker {
    pub fn new(cfg: SchemaConfig) -> Self {
        Self { cfg, store: None }
    }

    pub fn with_store(cfg: SchemaConfig, store: EmbeddingStore) -> Self {
        Self { cfg, store: Some(store) }
    }

    pub fn rank_tables(
        &self,
        query: &str,
        snapshot: &SchemaSnapshot,
        top_n: Option<usize>,
    ) -> Vec<String> {
        let top_n = top_n.unwrap_or(self.cfg.ranker_top_n);
        let mut scored = match &self.store {
            Some(store) => self.score_with_store(query, snapshot, store),
            None => Self::score_with_tfidf(query, snapshot),
        };
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(top_n).map(|(table, _)| table).collect()
    }

    fn score_with_store(
        &self,
        query: &str,
        snapshot: &SchemaSnapshot,
        store: &EmbeddingStore,
    ) -> Vec<(String, f64)> {
        let query_vec = store.vectorizer.transform(query);
        snapshot
            .tables
            .iter()
            .map(|(table, meta)| {
                let mut corpus: Vec<&str> = vec![meta.description.as_deref().unwrap_or("")];
                for (col_name, col) in &meta.columns {
                    corpus.push(col.description.as_deref().unwrap_or(col_name));
                }
                let table_vec = store.vectorizer.transform(&corpus.join(" "));
                let score = cosine_similarity(&query_vec, &table_vec);
                let boost = Self::column_overlap_boost(query, meta.columns.keys());
                (table.clone(), score + boost)
            })
            .collect()
    }

    fn score_with_tfidf(query: &str, snapshot: &SchemaSnapshot) -> Vec<(String, f64)> {
        let mut documents = Vec::new();
        let mut keys = Vec::new();
        for (table, meta) in &snapshot.tables {
            let mut doc_parts: Vec<&str> = vec![table, meta.description.as_deref().unwrap_or("")];
            for (col_name, col_meta) in &meta.columns {
                doc_parts.push(col_name);
                if let Some(desc) = &col_meta.description {
                    doc_parts.push(desc);
                }
            }
            documents.push(doc_parts.join(" "));
            keys.push(table.clone());
        }
        if documents.is_empty() {
            return Vec::new();
        }
        let model = TfidfModel::fit(&documents);
        let query_vec = model.transform(query);
        keys.into_iter()
            .zip(documents.iter().map(|doc| cosine_similarity(&query_vec, &model.transform(doc))))
            .collect()
    }

    fn column_overlap_boost<'a>(query: &str, columns: impl Iterator<Item = &'a String>) -> f64 {
        if query.is_empty() {
            return 0.0;
        }
        let lower_query = query.to_lowercase();
        let mut score: f64 = 0.0;
        for column in columns {
            if lower_query.contains(&column.to_lowercase()) {
                score += 0.1;
            }
        }
        score.min(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::{ColumnMeta, TableMeta};
    use std::collections::BTreeMap;

    fn table(description: &str, columns: &[&str]) -> TableMeta {
        TableMeta {
            description: Some(description.to_string()),
            columns: columns
                .iter()
                .map(|c| (c.to_string(), ColumnMeta::default()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    fn claims_snapshot() -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();
        snapshot.tables.insert(
            "public.claims".to_string(),
            table("Insurance claims filed by customers", &["claim_id", "customer_id", "status"]),
        );
        snapshot.tables.insert(
            "public.shipments".to_string(),
            table("Shipment records and tracking", &["shipment_id", "carrier"]),
        );
        snapshot
    }

    #[test]
    fn prefers_matching_table() {
        let ranker = SchemaRanker::new(SchemaConfig::default());
        let ranked = ranker.rank_tables("claims for customers", &claims_snapshot(), Some(1));
        assert_eq!(ranked, vec!["public.claims".to_string()]);
    }

    #[test]
    fn empty_schema_ranks_empty() {
        let ranker = SchemaRanker::new(SchemaConfig::default());
        let ranked = ranker.rank_tables("anything", &SchemaSnapshot::default(), None);
        assert!(ranked.is_empty());
    }

    #[test]
    fn store_mode_applies_column_boost() {
        let snapshot = claims_snapshot();
        let documents: Vec<String> = snapshot
            .tables
            .values()
            .map(|meta| {
                let cols: Vec<&str> = meta.columns.keys().map(String::as_str).collect();
                format!("{} {}", meta.description.as_deref().unwrap_or(""), cols.join(" "))
            })
            .collect();
        let store = EmbeddingStore { vectorizer: TfidfModel::fit(&documents) };
        let ranker = SchemaRanker::with_store(SchemaConfig::default(), store);

        // "status" appears verbatim as a column of public.claims.
        let ranked = ranker.rank_tables("claims with status", &snapshot, Some(2));
        assert_eq!(ranked[0], "public.claims");
    }

    #[test]
    fn column_boost_is_capped() {
        let columns: Vec<String> =
            (0..10).map(|i| format!("c{i}")).collect();
        let query = columns.join(" ");
        let boost = SchemaRanker::column_overlap_boost(&query, columns.iter());
        assert!((boost - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn tfidf_transform_is_normalized() {
        let docs = vec!["claims customers status".to_string(), "shipments carrier".to_string()];
        let model = TfidfModel::fit(&docs);
        let vec = model.transform("claims status");
        let norm: f64 = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }
}

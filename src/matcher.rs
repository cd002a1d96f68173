use crate::error::RankError;
use crate::storage::EmbeddingRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub identity: String,
    pub source_ref: String,
    pub similarity: f32,
}

impl QueryResult {
    /// Similarity as a percentage with two decimals, e.g. `97.31%`.
    pub fn similarity_percent(&self) -> String {
        format!("{:.2}%", self.similarity * 100.0)
    }

    pub fn distance(&self) -> f32 {
        1.0 - self.similarity
    }
}

/// Cosine similarity in [-1, 1]. Zero-norm or non-finite inputs score 0.0.
///
/// Both slices must have the same length. Only [`rank`] checks this and
/// reports a mismatch as an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "cosine_similarity: length mismatch");
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !sim.is_finite() {
        return 0.0;
    }
    sim.clamp(-1.0, 1.0) as f32
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Score every candidate against `query` and return the best `k`,
/// most similar first. Ties keep store order.
pub fn rank(
    query: &[f32],
    candidates: &[EmbeddingRecord],
    k: usize,
) -> Result<Vec<QueryResult>, RankError> {
    let mut scored = candidates
        .iter()
        .enumerate()
        .map(|(index, r)| {
            if r.embedding.len() != query.len() {
                return Err(RankError::DimensionMismatch {
                    index,
                    found: r.embedding.len(),
                    expected: query.len(),
                });
            }
            Ok(QueryResult {
                identity: r.identity.clone(),
                source_ref: r.source_ref.clone(),
                similarity: cosine_similarity(query, &r.embedding),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // stable: equal scores stay in input order
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(k);
    Ok(scored)
}

pub fn best_match(
    query: &[f32],
    candidates: &[EmbeddingRecord],
) -> Result<Option<QueryResult>, RankError> {
    Ok(rank(query, candidates, 1)?.into_iter().next())
}

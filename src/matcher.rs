use crate::store::{Gallery, ReferenceRecord};
use facematch_vision::Embedding;

/// Outcome of scanning a gallery for one probe embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome<'a> {
    Matched {
        record: &'a ReferenceRecord,
        score: f32,
    },
    /// Nothing cleared the threshold. `best_score` is still reported.
    Unknown { best_score: f32 },
}

impl MatchOutcome<'_> {
    pub fn score(&self) -> f32 {
        match *self {
            Self::Matched { score, .. } => score,
            Self::Unknown { best_score } => best_score,
        }
    }
}

/// Cosine similarity of two normalized embeddings.
pub fn similarity(a: &Embedding, b: &Embedding) -> f32 {
    facematch_vision::match_embedding(a, b)
}

/// Linear scan for the most similar record.
///
/// The scan starts from a score of 0.0 and only a strictly greater score
/// replaces the current best, so the first record reaching the maximum wins
/// and the reported score is never negative.
pub fn best_match<'a>(gallery: &'a Gallery, probe: &Embedding, threshold: f32) -> MatchOutcome<'a> {
    let mut best: Option<&ReferenceRecord> = None;
    let mut best_score = 0.0f32;

    for record in gallery.records() {
        let score = similarity(probe, &record.embedding);
        if score > best_score {
            best_score = score;
            best = Some(record);
        }
    }

    match best {
        Some(record) if best_score >= threshold => MatchOutcome::Matched {
            record,
            score: best_score,
        },
        _ => MatchOutcome::Unknown { best_score },
    }
}

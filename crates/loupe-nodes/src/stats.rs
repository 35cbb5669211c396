//! Effectiveness statistics: pure functions over accumulated branch
//! results and baseline retrieval stats.

use std::collections::HashSet;

use loupe_core::models::{Effectiveness, InitialAnswerStats, ScopeStats};
use loupe_core::types::{FitStats, QuestionAnswerResult, RetrievalStats, Section};

/// Reported ratio when the baseline is absent/zero but the numerator is
/// positive: a strong improvement signal without dividing by zero.
pub const IMPROVEMENT_SENTINEL: f64 = 10.0;

/// The one place the ratio-with-sentinel policy lives.
///
/// - baseline > 0: `numerator / baseline` (a missing numerator counts as 0)
/// - baseline absent or 0, numerator > 0: [`IMPROVEMENT_SENTINEL`]
/// - both absent or 0: undefined (`None`)
pub fn boost_ratio(numerator: Option<f64>, baseline: Option<f64>) -> Option<f64> {
    let numerator = numerator.unwrap_or(0.0);
    match baseline {
        Some(b) if b > 0.0 => Some(numerator / b),
        _ if numerator > 0.0 => Some(IMPROVEMENT_SENTINEL),
        _ => None,
    }
}

/// Mean of the available section scores, `None` when no section is scored.
pub fn average_score(sections: &[Section]) -> Option<f64> {
    let scores: Vec<f64> = sections.iter().filter_map(|s| s.score).collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Initial-phase effectiveness: sub-question retrieval vs the
/// original-question baseline.
pub fn compute_initial_stats(
    answer_results: &[QuestionAnswerResult],
    original_question_stats: &RetrievalStats,
) -> InitialAnswerStats {
    let mut verified_ids: HashSet<&str> = HashSet::new();
    let mut support_total = 0.0;
    let mut support_seen = false;

    for result in answer_results {
        for id in &result.retrieval_stats.verified_section_ids {
            verified_ids.insert(id);
        }
        if let Some(score) = result.retrieval_stats.verified_avg_score {
            support_total += score;
            support_seen = true;
        }
    }

    let sub_questions = ScopeStats {
        num_verified_documents: verified_ids.len(),
        verified_avg_score: if support_seen && !answer_results.is_empty() {
            Some(support_total / answer_results.len() as f64)
        } else {
            None
        },
    };

    let original_question = ScopeStats {
        num_verified_documents: original_question_stats.verified_count.unwrap_or(0),
        verified_avg_score: original_question_stats.verified_avg_score,
    };

    let effectiveness = Effectiveness {
        utilized_chunk_ratio: boost_ratio(
            Some(sub_questions.num_verified_documents as f64),
            Some(original_question.num_verified_documents as f64),
        ),
        support_ratio: boost_ratio(
            sub_questions.verified_avg_score,
            original_question.verified_avg_score,
        ),
    };

    InitialAnswerStats {
        sub_questions,
        original_question,
        effectiveness,
    }
}

/// Document-level efficiency of the revision pass.
pub fn revision_doc_efficiency(initial: usize, revised: usize, combined: usize) -> f64 {
    if initial > 0 {
        combined as f64 / initial as f64
    } else if revised == 0 {
        0.0
    } else {
        IMPROVEMENT_SENTINEL
    }
}

/// Question-level efficiency of the revision pass, over positively graded
/// sub-questions.
pub fn revision_question_efficiency(
    initial_good: usize,
    new_good: usize,
    total_good: usize,
) -> f64 {
    if initial_good > 0 {
        total_good as f64 / initial_good as f64
    } else if new_good > 0 {
        IMPROVEMENT_SENTINEL
    } else {
        1.0
    }
}

/// Fit-score stats comparing a ranked ordering against a reference
/// ordering of the same sections.
///
/// `fit_score_lift` measures how front-loaded the scores are in the ranked
/// list (top-half mean minus bottom-half mean); `rerank_effect` is the mean
/// absolute positional displacement between the orderings.
pub fn calculate_fit_stats(ranked: &[Section], reference: &[Section]) -> FitStats {
    let fit_score_lift = if ranked.len() >= 2 {
        let mid = ranked.len() / 2;
        match (average_score(&ranked[..mid]), average_score(&ranked[mid..])) {
            (Some(top), Some(bottom)) => top - bottom,
            _ => 0.0,
        }
    } else {
        0.0
    };

    let reference_positions: std::collections::HashMap<String, usize> = reference
        .iter()
        .enumerate()
        .map(|(pos, s)| (s.section_id(), pos))
        .collect();
    let mut displacement = 0usize;
    let mut matched = 0usize;
    for (pos, section) in ranked.iter().enumerate() {
        if let Some(ref_pos) = reference_positions.get(&section.section_id()) {
            displacement += pos.abs_diff(*ref_pos);
            matched += 1;
        }
    }
    let rerank_effect = if matched > 0 {
        displacement as f64 / matched as f64
    } else {
        0.0
    };

    FitStats {
        fit_score_lift,
        rerank_effect,
    }
}

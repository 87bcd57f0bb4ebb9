//! Review-payload normalization.
//!
//! The review object arrives as a loosely-typed bag from external callers
//! (UI, queue worker, result callbacks). Everything funnels through
//! [`normalize_review_payload`] so the rest of the engine only ever sees a
//! fully-populated [`ReviewMetadata`].

use serde_json::Value;

use super::types::{EnrichmentRun, ReviewMetadata, ReviewState};

const SPEC_LIST_MAX: usize = 10;

const TRUE_WORDS: [&str; 5] = ["true", "1", "yes", "y", "ja"];
const FALSE_WORDS: [&str; 5] = ["false", "0", "no", "n", "nein"];

/// Tri-state boolean coercion: anything unrecognized is unknown, not false.
pub fn normalize_nullable_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            if lowered.is_empty() {
                return None;
            }
            if TRUE_WORDS.contains(&lowered.as_str()) {
                Some(true)
            } else if FALSE_WORDS.contains(&lowered.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Trim, drop empties, de-duplicate case-insensitively keeping the first
/// seen casing, cap at [`SPEC_LIST_MAX`] entries.
pub fn normalize_spec_list(value: &Value) -> Vec<String> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };

    let mut seen: Vec<String> = Vec::new();
    let mut out: Vec<String> = Vec::new();
    for entry in entries {
        let Value::String(raw) = entry else {
            continue;
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key = trimmed.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(trimmed.to_string());
        if out.len() >= SPEC_LIST_MAX {
            break;
        }
    }
    out
}

fn normalize_opt_string(value: Option<&Value>) -> Option<String> {
    let raw = value?.as_str()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Collapse a loose review bag into a fully-populated value object. Missing
/// and malformed fields default to `None`/empty rather than failing the
/// operation that carried them.
pub fn normalize_review_payload(payload: &Value) -> ReviewMetadata {
    let field = |name: &str| payload.get(name);

    let decision = normalize_opt_string(field("decision")).map(|d| d.to_lowercase());
    let state = normalize_opt_string(field("state")).and_then(|s| ReviewState::from_state(&s));

    ReviewMetadata {
        decision,
        state,
        information_present: field("information_present").and_then(normalize_nullable_bool),
        bad_format: field("bad_format").and_then(normalize_nullable_bool),
        wrong_information: field("wrong_information").and_then(normalize_nullable_bool),
        wrong_physical_dimensions: field("wrong_physical_dimensions")
            .and_then(normalize_nullable_bool),
        missing_spec: field("missing_spec").map(normalize_spec_list).unwrap_or_default(),
        unneeded_spec: field("unneeded_spec").map(normalize_spec_list).unwrap_or_default(),
        notes: normalize_opt_string(field("notes")),
        reviewed_by: normalize_opt_string(field("reviewedBy")),
    }
}

/// Last review snapshot reconstructed from a persisted run, for forwarding
/// to the invoker on resume. `None` when the run carries no review trace.
pub fn review_from_run(run: &EnrichmentRun) -> Option<ReviewMetadata> {
    if run.last_review_decision.is_none()
        && run.last_review_notes.is_none()
        && run.reviewed_by.is_none()
    {
        return None;
    }

    Some(ReviewMetadata {
        decision: run.last_review_decision.clone(),
        state: Some(run.review_state),
        notes: run.last_review_notes.clone(),
        reviewed_by: run.reviewed_by.clone(),
        ..ReviewMetadata::default()
    })
}

/// Review fields a restart will persist, plus the snapshot forwarded to the
/// invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReview {
    pub state: ReviewState,
    pub reviewed_by: Option<String>,
    pub decision: Option<String>,
    pub notes: Option<String>,
    pub forwarded: Option<ReviewMetadata>,
}

/// The restart three-way branch. Exactly one of:
/// - a supplied payload replaces the stored metadata verbatim,
/// - an explicit clear flag (without payload) resets it,
/// - otherwise the stored metadata is preserved untouched.
pub fn resolve_review_metadata(
    existing: Option<&EnrichmentRun>,
    supplied: Option<&ReviewMetadata>,
    clear: bool,
) -> ResolvedReview {
    if let Some(metadata) = supplied {
        let state = metadata
            .state
            .or_else(|| existing.map(|run| run.review_state))
            .unwrap_or(ReviewState::NotRequired);
        return ResolvedReview {
            state,
            reviewed_by: metadata.reviewed_by.clone(),
            decision: metadata.decision.clone(),
            notes: metadata.notes.clone(),
            forwarded: Some(metadata.clone()),
        };
    }

    if clear {
        return ResolvedReview {
            state: ReviewState::NotRequired,
            reviewed_by: None,
            decision: None,
            notes: None,
            forwarded: None,
        };
    }

    ResolvedReview {
        state: existing
            .map(|run| run.review_state)
            .unwrap_or(ReviewState::NotRequired),
        reviewed_by: existing.and_then(|run| run.reviewed_by.clone()),
        decision: existing.and_then(|run| run.last_review_decision.clone()),
        notes: existing.and_then(|run| run.last_review_notes.clone()),
        forwarded: existing.and_then(review_from_run),
    }
}

use serde_json::json;

use crate::core::runs::review::{
    normalize_nullable_bool, normalize_review_payload, normalize_spec_list,
};
use crate::core::runs::types::ReviewState;

#[test]
fn boolean_coercion_accepts_all_documented_spellings() {
    for truthy in [json!(true), json!(1), json!("yes"), json!("Y"), json!("JA"), json!("1")] {
        assert_eq!(normalize_nullable_bool(&truthy), Some(true), "{truthy:?}");
    }
    for falsy in [json!(false), json!(0), json!("no"), json!("n"), json!("Nein"), json!("0")] {
        assert_eq!(normalize_nullable_bool(&falsy), Some(false), "{falsy:?}");
    }
}

#[test]
fn unknown_booleans_stay_unknown_not_false() {
    for unknown in [json!("maybe"), json!(2), json!(""), json!("  "), json!(null), json!([1])] {
        assert_eq!(normalize_nullable_bool(&unknown), None, "{unknown:?}");
    }
}

#[test]
fn spec_lists_trim_dedup_and_drop_empties() {
    let input = json!([" Höhe ", "höhe", "Breite", "", "  "]);
    assert_eq!(normalize_spec_list(&input), vec!["Höhe", "Breite"]);
}

#[test]
fn spec_lists_cap_at_ten_entries() {
    let entries: Vec<serde_json::Value> =
        (1..=14).map(|i| json!(format!("feld-{i}"))).collect();
    let normalized = normalize_spec_list(&json!(entries));
    assert_eq!(normalized.len(), 10);
    assert_eq!(normalized[0], "feld-1");
    assert_eq!(normalized[9], "feld-10");
}

#[test]
fn payload_normalization_fills_every_field() {
    let payload = json!({
        "decision": " Approve ",
        "state": "pending",
        "information_present": "yes",
        "bad_format": "0",
        "wrong_information": 1,
        "wrong_physical_dimensions": "no",
        "missing_spec": [" width ", "width", "", "height"],
        "unneeded_spec": ["color"],
        "notes": " keep notes ",
        "reviewedBy": " reviewer "
    });

    let metadata = normalize_review_payload(&payload);
    assert_eq!(metadata.decision.as_deref(), Some("approve"));
    assert_eq!(metadata.state, Some(ReviewState::Pending));
    assert_eq!(metadata.information_present, Some(true));
    assert_eq!(metadata.bad_format, Some(false));
    assert_eq!(metadata.wrong_information, Some(true));
    assert_eq!(metadata.wrong_physical_dimensions, Some(false));
    assert_eq!(metadata.missing_spec, vec!["width", "height"]);
    assert_eq!(metadata.unneeded_spec, vec!["color"]);
    assert_eq!(metadata.notes.as_deref(), Some("keep notes"));
    assert_eq!(metadata.reviewed_by.as_deref(), Some("reviewer"));
}

#[test]
fn malformed_payload_defaults_instead_of_failing() {
    let payload = json!({
        "decision": "   ",
        "state": "weird",
        "information_present": {"nested": true},
        "missing_spec": "not-a-list",
        "notes": "",
        "reviewedBy": null
    });

    let metadata = normalize_review_payload(&payload);
    assert_eq!(metadata.decision, None);
    assert_eq!(metadata.state, None);
    assert_eq!(metadata.information_present, None);
    assert!(metadata.missing_spec.is_empty());
    assert_eq!(metadata.notes, None);
    assert_eq!(metadata.reviewed_by, None);
}

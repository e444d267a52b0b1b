//! Record normalization: one raw JSON record in, one `CanonicalPaper` or a
//! typed rejection out.
//!
//! Normalization is a filtering operation, not an erroring one: a record that
//! fails the acceptance predicate is reported as a `RejectReason` and the
//! caller logs it and moves on. Nothing here ever aborts a batch.
//!
//! Acceptance requires, in short-circuit order (cheapest / most selective
//! first): an allowed type tag, a non-null id, a non-null inverted-index
//! abstract, and an open-access flag set to true. `doi` is deliberately NOT
//! required here; the embedding stage filters on DOI presence downstream.

use crate::reconstruct::reconstruct_abstract;
use paperflow_core::{Author, CanonicalPaper};
use serde_json::Value;

/// Type tags admitted into the papers table.
pub const ALLOWED_TYPES: [&str; 2] = ["article", "preprint"];

/// Why a raw record was dropped. Expected at scale; logged, never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RejectReason {
    MalformedJson,
    UnsupportedType,
    MissingId,
    MissingAbstract,
    NotOpenAccess,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::MalformedJson => "malformed_json",
            RejectReason::UnsupportedType => "unsupported_type",
            RejectReason::MissingId => "missing_id",
            RejectReason::MissingAbstract => "missing_abstract",
            RejectReason::NotOpenAccess => "not_open_access",
        }
    }
}

/// Normalize one newline-delimited JSON line.
pub fn normalize_line(line: &str) -> Result<CanonicalPaper, RejectReason> {
    let v: Value = serde_json::from_str(line).map_err(|_| RejectReason::MalformedJson)?;
    normalize_value(&v)
}

/// Normalize one parsed raw record.
pub fn normalize_value(v: &Value) -> Result<CanonicalPaper, RejectReason> {
    let type_tag = v.get("type").and_then(Value::as_str).unwrap_or("");
    if !ALLOWED_TYPES.contains(&type_tag) {
        return Err(RejectReason::UnsupportedType);
    }

    let Some(paper_id) = v.get("id").and_then(Value::as_str) else {
        return Err(RejectReason::MissingId);
    };

    let inverted = v.get("abstract_inverted_index");
    if inverted.map_or(true, Value::is_null) {
        return Err(RejectReason::MissingAbstract);
    }

    let open_access = v.get("open_access");
    let is_oa = open_access
        .and_then(|oa| oa.get("is_oa"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_oa {
        return Err(RejectReason::NotOpenAccess);
    }

    Ok(CanonicalPaper {
        paper_id: paper_id.to_string(),
        doi: opt_str(v, "doi"),
        title: opt_str(v, "title"),
        created_date: opt_str(v, "created_date"),
        cited_by_count: v.get("cited_by_count").and_then(Value::as_i64),
        abstract_text: reconstruct_abstract(inverted),
        related_works: str_seq(v, "related_works"),
        referenced_works: str_seq(v, "referenced_works"),
        cited_by_api_url: opt_str(v, "cited_by_api_url"),
        oa_status: open_access
            .and_then(|oa| oa.get("oa_status"))
            .and_then(Value::as_str)
            .map(str::to_string),
        oa_url: open_access
            .and_then(|oa| oa.get("oa_url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        authors: authors(v),
    })
}

/// Best-effort id fragment for rejection diagnostics.
pub fn id_fragment(v: &Value) -> &str {
    v.get("id").and_then(Value::as_str).unwrap_or("<no id>")
}

fn opt_str(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn str_seq(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// Only authorships carrying BOTH a display name and an id survive; partial
// authorships are dropped silently without rejecting the record.
fn authors(v: &Value) -> Vec<Author> {
    v.get("authorships")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|a| {
                    let author = a.get("author")?;
                    let name = author.get("display_name").and_then(Value::as_str)?;
                    let id = author.get("id").and_then(Value::as_str)?;
                    Some(Author {
                        name: name.to_string(),
                        id: id.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accepted_record() -> Value {
        json!({
            "id": "W1",
            "type": "article",
            "doi": "10.1/x",
            "abstract_inverted_index": {"hello": [0], "world": [1]},
            "open_access": {"is_oa": true, "oa_status": "gold", "oa_url": "https://x/pdf"},
            "authorships": [{"author": {"display_name": "Jane", "id": "A1"}}]
        })
    }

    #[test]
    fn accepts_the_reference_record_end_to_end() {
        let paper = normalize_value(&accepted_record()).unwrap();
        assert_eq!(paper.paper_id, "W1");
        assert_eq!(paper.doi.as_deref(), Some("10.1/x"));
        assert_eq!(paper.abstract_text, "hello world");
        assert_eq!(
            paper.authors,
            vec![Author {
                name: "Jane".to_string(),
                id: "A1".to_string()
            }]
        );
        assert!(paper.related_works.is_empty());
        assert!(paper.referenced_works.is_empty());
        assert_eq!(paper.oa_status.as_deref(), Some("gold"));
    }

    #[test]
    fn rejects_unsupported_type() {
        let mut v = accepted_record();
        v["type"] = json!("dataset");
        assert_eq!(normalize_value(&v), Err(RejectReason::UnsupportedType));
        v.as_object_mut().unwrap().remove("type");
        assert_eq!(normalize_value(&v), Err(RejectReason::UnsupportedType));
    }

    #[test]
    fn rejects_missing_id() {
        let mut v = accepted_record();
        v["id"] = Value::Null;
        assert_eq!(normalize_value(&v), Err(RejectReason::MissingId));
    }

    #[test]
    fn rejects_missing_abstract_index() {
        let mut v = accepted_record();
        v["abstract_inverted_index"] = Value::Null;
        assert_eq!(normalize_value(&v), Err(RejectReason::MissingAbstract));
        v.as_object_mut().unwrap().remove("abstract_inverted_index");
        assert_eq!(normalize_value(&v), Err(RejectReason::MissingAbstract));
    }

    #[test]
    fn rejects_not_open_access() {
        let mut v = accepted_record();
        v["open_access"] = json!({"is_oa": false});
        assert_eq!(normalize_value(&v), Err(RejectReason::NotOpenAccess));
        v.as_object_mut().unwrap().remove("open_access");
        assert_eq!(normalize_value(&v), Err(RejectReason::NotOpenAccess));
    }

    #[test]
    fn doi_is_not_required_for_acceptance() {
        let mut v = accepted_record();
        v.as_object_mut().unwrap().remove("doi");
        let paper = normalize_value(&v).unwrap();
        assert_eq!(paper.doi, None);
    }

    #[test]
    fn malformed_abstract_index_yields_empty_string_not_rejection() {
        let mut v = accepted_record();
        // Present but malformed: fail-soft to "" per the reconstructor policy.
        v["abstract_inverted_index"] = json!({"word": [-1]});
        let paper = normalize_value(&v).unwrap();
        assert_eq!(paper.abstract_text, "");
    }

    #[test]
    fn partial_authorships_are_dropped_not_rejected() {
        let mut v = accepted_record();
        v["authorships"] = json!([
            {"author": {"display_name": "A", "id": "1"}},
            {"author": {"display_name": "B"}},
            {"author": null}
        ]);
        let paper = normalize_value(&v).unwrap();
        assert_eq!(
            paper.authors,
            vec![Author {
                name: "A".to_string(),
                id: "1".to_string()
            }]
        );
    }

    #[test]
    fn malformed_json_line_is_a_rejection() {
        assert_eq!(
            normalize_line("{not json"),
            Err(RejectReason::MalformedJson)
        );
    }

    #[test]
    fn sequences_default_to_empty_when_absent_or_wrong_type() {
        let mut v = accepted_record();
        v["related_works"] = json!("not-an-array");
        let paper = normalize_value(&v).unwrap();
        assert!(paper.related_works.is_empty());
    }
}

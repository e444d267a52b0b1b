//! Abstract reconstruction from an inverted-index representation.
//!
//! Source records store abstracts as `word -> [positions]` to avoid repeating
//! common words. Reconstruction places each word at its recorded positions and
//! joins the positional array with single spaces.
//!
//! This is deliberately fail-soft: any malformed input (non-object, non-array
//! positions, negative/non-integer/absurd positions) yields `""` rather than
//! an error, so a broken abstract never aborts processing of the containing
//! record's other fields.

use serde_json::Value;

/// Upper bound on the highest word position we will reconstruct. Positions
/// beyond this are treated as malformed input, which keeps a hostile record
/// from forcing a giant allocation.
const MAX_POSITION: i64 = 100_000;

/// Rebuild an abstract from its inverted-index JSON value.
///
/// `None`, null, or an empty object yield `""`. Output is sized from the
/// maximum position observed across ALL words, so interleaved words
/// reconstruct into correct reading order; positions with no assigned word
/// become empty strings in the joined output.
pub fn reconstruct_abstract(inverted_index: Option<&Value>) -> String {
    let Some(obj) = inverted_index.and_then(|v| v.as_object()) else {
        return String::new();
    };
    if obj.is_empty() {
        return String::new();
    }

    // First pass: validate every position and find the global maximum.
    let mut max_pos: i64 = -1;
    for positions in obj.values() {
        let Some(arr) = positions.as_array() else {
            return String::new();
        };
        for p in arr {
            let Some(p) = p.as_i64() else {
                return String::new();
            };
            if !(0..=MAX_POSITION).contains(&p) {
                return String::new();
            }
            max_pos = max_pos.max(p);
        }
    }
    if max_pos < 0 {
        // Every word had an empty position list.
        return String::new();
    }

    let mut words: Vec<&str> = vec![""; (max_pos + 1) as usize];
    for (word, positions) in obj {
        // Validated above; every position is in bounds.
        for p in positions.as_array().into_iter().flatten() {
            if let Some(p) = p.as_i64() {
                words[p as usize] = word.as_str();
            }
        }
    }
    words.join(" ")
}

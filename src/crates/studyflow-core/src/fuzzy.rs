//! Fuzzy text replacement
//!
//! Document edits proposed by a model rarely quote the document perfectly.
//! [`fuzzy_replace`] finds the span of the document closest to `old_text`
//! within an edit-distance budget and splices `new_text` into it.
//!
//! # Matching rules
//!
//! | `old_text` length (chars) | Rule |
//! |---------------------------|------|
//! | `< 10` | exact substring, first occurrence |
//! | `10..=100` | `max(1, ⌊len × (1 − threshold)⌋)` edits allowed |
//! | `> 100` | same, capped at 15 edits |
//!
//! Among candidate spans the winner has the smallest distance, then the
//! earliest start, then the length closest to `old_text`.
//! `similarity = 1 − distance / len`.
//!
//! ```rust
//! use studyflow_core::fuzzy::{fuzzy_replace, DEFAULT_THRESHOLD};
//!
//! let doc = "Photosynthesis converts light energy into chemical energy.";
//! let out = fuzzy_replace(doc, "converts light energy in to", "turns light into", DEFAULT_THRESHOLD).unwrap();
//!
//! assert_eq!(out.document, "Photosynthesis turns light into chemical energy.");
//! assert_eq!(out.distance, 1);
//! ```
//!
//! # Search
//!
//! Distances come from the Sellers variant of the Levenshtein DP (free
//! start anywhere in the document), one column per document char. Ends
//! reaching the best distance are then refined to concrete start offsets
//! by checking the few starts the budget allows.

use std::ops::Range;
use thiserror::Error;

/// Default minimum similarity for a fuzzy match.
pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Targets shorter than this must match exactly.
pub const EXACT_MATCH_BELOW: usize = 10;

/// Targets longer than this have their budget capped.
pub const LONG_TARGET: usize = 100;

/// Budget cap for long targets.
pub const LONG_TARGET_MAX_DISTANCE: usize = 15;

/// Recoverable edit failure; the document is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("Text not found in document (allowed {max_distance} edits): {target:?}")]
    NotFound { target: String, max_distance: usize },

    #[error("Edit target is empty")]
    EmptyTarget,
}

/// Result of a successful replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// Document after the replacement
    pub document: String,
    /// Text of the replaced span as it appeared in the original document
    pub matched: String,
    /// Replaced span, in char offsets of the original document
    pub span: Range<usize>,
    pub distance: usize,
    pub similarity: f64,
}

/// Edit budget for a target of `len` chars.
pub fn max_distance(len: usize, threshold: f64) -> usize {
    if len < EXACT_MATCH_BELOW {
        return 0;
    }
    let allowed = (len as f64 * (1.0 - threshold) + 1e-9).floor().max(0.0) as usize;
    let allowed = allowed.max(1);
    if len > LONG_TARGET {
        allowed.min(LONG_TARGET_MAX_DISTANCE)
    } else {
        allowed
    }
}

/// Replace the span of `document` best matching `old_text` with `new_text`.
pub fn fuzzy_replace(
    document: &str,
    old_text: &str,
    new_text: &str,
    threshold: f64,
) -> Result<EditOutcome, EditError> {
    if old_text.is_empty() {
        return Err(EditError::EmptyTarget);
    }

    let doc: Vec<char> = document.chars().collect();
    let target: Vec<char> = old_text.chars().collect();
    let len = target.len();
    let budget = max_distance(len, threshold);

    let found = find_exact(&doc, &target).map(|start| (start..start + len, 0)).or_else(|| {
        if budget == 0 {
            None
        } else {
            find_approximate(&doc, &target, budget)
        }
    });

    let Some((span, distance)) = found else {
        return Err(EditError::NotFound {
            target: old_text.to_string(),
            max_distance: budget,
        });
    };

    let matched: String = doc[span.clone()].iter().collect();
    let mut replaced: String = doc[..span.start].iter().collect();
    replaced.push_str(new_text);
    replaced.extend(&doc[span.end..]);

    Ok(EditOutcome {
        document: replaced,
        matched,
        span,
        distance,
        similarity: 1.0 - distance as f64 / len as f64,
    })
}

fn find_exact(doc: &[char], target: &[char]) -> Option<usize> {
    if target.len() > doc.len() {
        return None;
    }
    doc.windows(target.len()).position(|w| w == target)
}

fn find_approximate(doc: &[char], target: &[char], budget: usize) -> Option<(Range<usize>, usize)> {
    let m = target.len();

    // Sellers DP, column by column. `column[i]` is the best distance of
    // target[..i] against any document substring ending at the current char.
    let mut column: Vec<usize> = (0..=m).collect();
    let mut end_distances = Vec::with_capacity(doc.len());
    for &ch in doc {
        let mut diag = column[0];
        column[0] = 0;
        for i in 1..=m {
            let above = column[i];
            let substitute = diag + usize::from(target[i - 1] != ch);
            column[i] = substitute.min(above + 1).min(column[i - 1] + 1);
            diag = above;
        }
        end_distances.push(column[m]);
    }

    let best = end_distances.iter().copied().min()?;
    if best > budget {
        return None;
    }

    let mut winner: Option<Range<usize>> = None;
    for (idx, &d) in end_distances.iter().enumerate() {
        if d != best {
            continue;
        }
        let end = idx + 1;
        let lowest = end.saturating_sub(m + best);
        let highest = (end + best).saturating_sub(m).min(end);
        for start in lowest..=highest {
            if levenshtein(&doc[start..end], target) != best {
                continue;
            }
            let candidate = start..end;
            if better(&candidate, winner.as_ref(), m) {
                winner = Some(candidate);
            }
        }
    }

    winner.map(|span| (span, best))
}

fn better(candidate: &Range<usize>, current: Option<&Range<usize>>, target_len: usize) -> bool {
    let Some(current) = current else {
        return true;
    };
    if candidate.start != current.start {
        return candidate.start < current.start;
    }
    let gap = |r: &Range<usize>| r.len().abs_diff(target_len);
    gap(candidate) < gap(current)
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_budget_rules() {
        assert_eq!(max_distance(9, DEFAULT_THRESHOLD), 0);
        assert_eq!(max_distance(10, DEFAULT_THRESHOLD), 1);
        assert_eq!(max_distance(20, DEFAULT_THRESHOLD), 3);
        assert_eq!(max_distance(25, DEFAULT_THRESHOLD), 3);
        assert_eq!(max_distance(100, DEFAULT_THRESHOLD), 15);
        assert_eq!(max_distance(200, DEFAULT_THRESHOLD), 15);
        assert_eq!(max_distance(20, 0.9), 2);
    }

    #[test]
    fn test_short_target_requires_exact_match() {
        let doc = "the cat sat on the mat";
        let out = fuzzy_replace(doc, "the", "a", DEFAULT_THRESHOLD).unwrap();
        assert_eq!(out.document, "a cat sat on the mat");
        assert_eq!(out.span, 0..3);

        let err = fuzzy_replace(doc, "teh", "a", DEFAULT_THRESHOLD).unwrap_err();
        assert!(matches!(err, EditError::NotFound { max_distance: 0, .. }));
    }

    #[test]
    fn test_empty_target() {
        assert_eq!(
            fuzzy_replace("doc", "", "x", DEFAULT_THRESHOLD),
            Err(EditError::EmptyTarget)
        );
    }

    #[test]
    fn test_verbatim_match_has_full_similarity() {
        let doc = "Alpha beta gamma delta. Alpha beta gamma delta.";
        let out = fuzzy_replace(doc, "beta gamma delta", "BGD", DEFAULT_THRESHOLD).unwrap();

        assert_eq!(out.document, "Alpha BGD. Alpha beta gamma delta.");
        assert_eq!(out.distance, 0);
        assert_eq!(out.similarity, 1.0);
    }

    #[test]
    fn test_threshold_boundary() {
        // 25-char target, budget of 3 edits at 0.85.
        let target = "abcdefghijklmnopqrstuvwxy";
        assert_eq!(target.chars().count(), 25);

        let three_edits = "xx abcXefgYijklmZopqrstuvwxy xx";
        let out = fuzzy_replace(three_edits, target, "!", DEFAULT_THRESHOLD).unwrap();
        assert_eq!(out.document, "xx ! xx");
        assert_eq!(out.distance, 3);
        assert!((out.similarity - 0.88).abs() < 1e-9);

        let four_edits = "xx abcXefgYijklmZopqrsWuvwxy xx";
        assert!(matches!(
            fuzzy_replace(four_edits, target, "!", DEFAULT_THRESHOLD),
            Err(EditError::NotFound { max_distance: 3, .. })
        ));
    }

    #[test]
    fn test_prefers_earliest_of_equal_matches() {
        let doc = "one: the quick brown fix / two: the quick brown fax";
        let out = fuzzy_replace(doc, "the quick brown fox", "X", DEFAULT_THRESHOLD).unwrap();
        assert_eq!(out.document, "one: X / two: the quick brown fax");
        assert_eq!(out.matched, "the quick brown fix");
    }

    #[test]
    fn test_long_target_budget_is_capped() {
        let target: String = "lorem ipsum dolor sit amet ".repeat(5);
        let len = target.chars().count();
        assert!(len > LONG_TARGET);

        let mut mangled: Vec<char> = target.chars().collect();
        for i in 0..16 {
            mangled[i * 8] = '#';
        }
        let mangled: String = mangled.into_iter().collect();
        assert!(fuzzy_replace(&mangled, &target, "x", 0.5).is_err());

        let mut lighter: Vec<char> = target.chars().collect();
        for i in 0..15 {
            lighter[i * 8] = '#';
        }
        let lighter: String = lighter.into_iter().collect();
        let out = fuzzy_replace(&lighter, &target, "x", 0.5).unwrap();
        assert_eq!(out.distance, 15);
        assert_eq!(out.document, "x");
    }

    #[test]
    fn test_multibyte_text() {
        let doc = "Die Größe der Zelle hängt vom Wasser ab.";
        let out = fuzzy_replace(doc, "Grösse der Zelle", "Zellgröße", DEFAULT_THRESHOLD).unwrap();
        assert_eq!(out.document, "Die Zellgröße hängt vom Wasser ab.");
        assert_eq!(out.matched, "Größe der Zelle");
    }

    proptest! {
        #[test]
        fn prop_verbatim_replaces_first_occurrence(
            prefix in "[a-z ]{0,30}",
            target in "[a-z ]{1,40}",
            suffix in "[a-z ]{0,30}",
            replacement in "[A-Z]{0,8}",
        ) {
            let doc = format!("{prefix}{target}{suffix}");
            let out = fuzzy_replace(&doc, &target, &replacement, DEFAULT_THRESHOLD).unwrap();

            prop_assert_eq!(out.distance, 0);
            prop_assert_eq!(out.similarity, 1.0);
            prop_assert_eq!(out.document, doc.replacen(&target, &replacement, 1));
        }
    }
}

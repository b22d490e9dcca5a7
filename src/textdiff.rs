//! Word-level change measurement between two translations.
//!
//! The ratio is `2·LCS / (|a| + |b|)` over whitespace tokens, matching the
//! sequence-matcher ratio the editors' review tooling reports, so the
//! override percentage shown in the audit trail agrees with what they saw
//! when they made the edit.

/// Similarity ratio in `[0, 1]` over whitespace tokens.
///
/// Returns `None` when both sides are empty or whitespace-only; there is no
/// text on either side to compare.
pub fn token_similarity(a: &str, b: &str) -> Option<f32> {
    let ta: Vec<&str> = a.split_whitespace().collect();
    let tb: Vec<&str> = b.split_whitespace().collect();
    if ta.is_empty() && tb.is_empty() {
        return None;
    }
    let lcs = lcs_len(&ta, &tb);
    Some(2.0 * lcs as f32 / (ta.len() + tb.len()) as f32)
}

/// How much of the translation the edit replaced, as a percentage.
///
/// `None` only when both sides are empty; an empty side against a non-empty
/// one is a full replacement (100).
pub fn override_percentage(previous: &str, new: &str) -> Option<f32> {
    token_similarity(previous, new).map(|r| (1.0 - r) * 100.0)
}

/// Longest common subsequence length over token slices.
///
/// Rolling single-row DP; translations are sentence-sized so the quadratic
/// bound is fine.
fn lcs_len(a: &[&str], b: &[&str]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut row = vec![0usize; b.len() + 1];
    for ta in a {
        let mut prev_diag = 0;
        for (j, tb) in b.iter().enumerate() {
            let tmp = row[j + 1];
            row[j + 1] = if ta == tb {
                prev_diag + 1
            } else {
                row[j + 1].max(row[j])
            };
            prev_diag = tmp;
        }
    }
    row[b.len()]
}

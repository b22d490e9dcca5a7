//! Corpus BLEU and chrF.
//!
//! Prediction/reference pairs come exclusively from overridden segments:
//! prediction = the pre-edit text captured by the first override, reference =
//! the latest accepted text. Segments without overrides have no independent
//! ground truth and contribute nothing.
//!
//! BLEU: corpus-level, n-grams 1–4 over whitespace tokens, clipped counts,
//! brevity penalty, exp smoothing for zero-match orders (orders longer than
//! the shortest prediction are skipped). chrF: corpus-level character
//! n-grams 1–6 with whitespace removed, β = 2. Both scores are 0–100.

use std::collections::HashMap;

const BLEU_MAX_ORDER: usize = 4;
const CHRF_MAX_ORDER: usize = 6;
const CHRF_BETA: f64 = 2.0;

/// Corpus BLEU over (prediction, reference) pairs.
pub fn corpus_bleu(pairs: &[(String, String)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }

    let mut matched = [0usize; BLEU_MAX_ORDER];
    let mut totals = [0usize; BLEU_MAX_ORDER];
    let mut pred_len = 0usize;
    let mut ref_len = 0usize;

    for (pred, reference) in pairs {
        let pt: Vec<&str> = pred.split_whitespace().collect();
        let rt: Vec<&str> = reference.split_whitespace().collect();
        pred_len += pt.len();
        ref_len += rt.len();

        for n in 1..=BLEU_MAX_ORDER {
            if pt.len() < n {
                continue;
            }
            let pred_counts = ngram_counts(&pt, n);
            let ref_counts = ngram_counts(&rt, n);
            for (gram, count) in &pred_counts {
                let clip = ref_counts.get(gram).copied().unwrap_or(0);
                matched[n - 1] += (*count).min(clip);
            }
            totals[n - 1] += pt.len() - n + 1;
        }
    }

    if pred_len == 0 || totals[0] == 0 || matched[0] == 0 {
        return 0.0;
    }

    let mut log_sum = 0.0;
    let mut orders = 0usize;
    let mut smooth = 1.0f64;
    for n in 0..BLEU_MAX_ORDER {
        if totals[n] == 0 {
            continue;
        }
        let precision = if matched[n] > 0 {
            matched[n] as f64 / totals[n] as f64
        } else {
            smooth *= 2.0;
            1.0 / (smooth * totals[n] as f64)
        };
        log_sum += precision.ln();
        orders += 1;
    }

    let geo_mean = (log_sum / orders as f64).exp();
    let bp = if pred_len >= ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / pred_len as f64).exp()
    };

    100.0 * bp * geo_mean
}

/// Corpus chrF over (prediction, reference) pairs.
pub fn corpus_chrf(pairs: &[(String, String)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }

    let mut matched = [0usize; CHRF_MAX_ORDER];
    let mut pred_totals = [0usize; CHRF_MAX_ORDER];
    let mut ref_totals = [0usize; CHRF_MAX_ORDER];

    for (pred, reference) in pairs {
        let pc: Vec<char> = pred.chars().filter(|c| !c.is_whitespace()).collect();
        let rc: Vec<char> = reference.chars().filter(|c| !c.is_whitespace()).collect();

        for n in 1..=CHRF_MAX_ORDER {
            let pred_counts = char_ngram_counts(&pc, n);
            let ref_counts = char_ngram_counts(&rc, n);
            for (gram, count) in &pred_counts {
                let clip = ref_counts.get(gram).copied().unwrap_or(0);
                matched[n - 1] += (*count).min(clip);
            }
            pred_totals[n - 1] += pc.len().saturating_sub(n - 1);
            ref_totals[n - 1] += rc.len().saturating_sub(n - 1);
        }
    }

    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    let mut orders = 0usize;
    for n in 0..CHRF_MAX_ORDER {
        if pred_totals[n] == 0 && ref_totals[n] == 0 {
            continue;
        }
        let p = if pred_totals[n] > 0 {
            matched[n] as f64 / pred_totals[n] as f64
        } else {
            0.0
        };
        let r = if ref_totals[n] > 0 {
            matched[n] as f64 / ref_totals[n] as f64
        } else {
            0.0
        };
        precision_sum += p;
        recall_sum += r;
        orders += 1;
    }

    if orders == 0 {
        return 0.0;
    }
    let precision = precision_sum / orders as f64;
    let recall = recall_sum / orders as f64;
    if precision + recall == 0.0 {
        return 0.0;
    }

    let beta_sq = CHRF_BETA * CHRF_BETA;
    100.0 * (1.0 + beta_sq) * precision * recall / (beta_sq * precision + recall)
}

fn ngram_counts<'a>(tokens: &[&'a str], n: usize) -> HashMap<Vec<&'a str>, usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window.to_vec()).or_insert(0) += 1;
        }
    }
    counts
}

fn char_ngram_counts(chars: &[char], n: usize) -> HashMap<Vec<char>, usize> {
    let mut counts = HashMap::new();
    if chars.len() >= n {
        for window in chars.windows(n) {
            *counts.entry(window.to_vec()).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(p, r)| (p.to_string(), r.to_string()))
            .collect()
    }

    // ── BLEU ──────────────────────────────────────────────────────

    #[test]
    fn bleu_identical_corpus_is_100() {
        let p = pairs(&[("the cat sat on the mat", "the cat sat on the mat")]);
        assert!((corpus_bleu(&p) - 100.0).abs() < 1e-6);
    }

    #[test]
    fn bleu_disjoint_corpus_is_0() {
        let p = pairs(&[("aa bb cc dd", "ww xx yy zz")]);
        assert_eq!(corpus_bleu(&p), 0.0);
    }

    #[test]
    fn bleu_empty_corpus_is_0() {
        assert_eq!(corpus_bleu(&[]), 0.0);
    }

    #[test]
    fn bleu_known_value() {
        // p1=5/6, p2=3/5, p3=1/4, p4 smoothed to 1/6; equal lengths so BP=1.
        let p = pairs(&[("the cat sat on the mat", "the cat is on the mat")]);
        let bleu = corpus_bleu(&p);
        assert!((bleu - 37.995).abs() < 0.05, "got {bleu}");
    }

    #[test]
    fn bleu_clipping_caps_repeated_tokens() {
        // Four "the" against a reference containing it twice: clipped 1-gram
        // precision is 2/4, so the score stays well below a perfect match.
        let inflated = pairs(&[("the the the the", "the cat the mat")]);
        let honest = pairs(&[("the cat the mat", "the cat the mat")]);
        assert!(corpus_bleu(&inflated) < corpus_bleu(&honest));
    }

    #[test]
    fn bleu_brevity_penalty_punishes_short_predictions() {
        let short = pairs(&[("the cat", "the cat sat on the mat today")]);
        let full = pairs(&[("the cat sat on the mat today", "the cat sat on the mat today")]);
        assert!(corpus_bleu(&short) < corpus_bleu(&full));
    }

    // ── chrF ──────────────────────────────────────────────────────

    #[test]
    fn chrf_identical_corpus_is_100() {
        let p = pairs(&[("pişik xalçada oturdu", "pişik xalçada oturdu")]);
        assert!((corpus_chrf(&p) - 100.0).abs() < 1e-6);
    }

    #[test]
    fn chrf_disjoint_corpus_is_0() {
        let p = pairs(&[("aaaa", "zzzz")]);
        assert_eq!(corpus_chrf(&p), 0.0);
    }

    #[test]
    fn chrf_empty_corpus_is_0() {
        assert_eq!(corpus_chrf(&[]), 0.0);
    }

    #[test]
    fn chrf_orders_by_closeness() {
        let close = pairs(&[("pişik xalçada oturdu", "pişik xalçada uzandı")]);
        let far = pairs(&[("pişik xalçada oturdu", "hava bu gün soyuqdur")]);
        assert!(corpus_chrf(&close) > corpus_chrf(&far));
    }

    #[test]
    fn chrf_ignores_whitespace_differences() {
        let a = pairs(&[("pişik  xalçada   oturdu", "pişik xalçada oturdu")]);
        assert!((corpus_chrf(&a) - 100.0).abs() < 1e-6);
    }
}

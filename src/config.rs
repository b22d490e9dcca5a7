//! Engine configuration.
//!
//! Thresholds are configuration, not hard-coded constants, but the
//! `direct_hit_threshold` split (at-or-above means verbatim reuse, below
//! means hint-only) is a behavioral contract the tests pin down.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cosine similarity at or above which a cache match substitutes for the
    /// model verbatim, and above which provenance attributes to the cache.
    pub direct_hit_threshold: f32,
    /// Lower bound of the "hint" band: surfaced to editors, never substituted.
    pub hint_threshold: f32,
    /// Threshold the translation path queries the cache with.
    pub reuse_query_threshold: f32,
    /// Low-bar threshold for the resolver's "does any plausible match exist"
    /// probe.
    pub provenance_probe_threshold: f32,
    /// Default k for `find_nearest` when the caller does not specify one.
    pub default_k: usize,
    /// Expected embedding dimension; a provider returning anything else is a
    /// configuration error.
    pub embedding_dim: usize,
    /// Timeout for a single embedding call, in seconds.
    pub embed_timeout_secs: u64,
    /// Upper bound on concurrent per-segment resolutions in batch jobs.
    pub max_concurrent_resolutions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            direct_hit_threshold: 0.95,
            hint_threshold: 0.70,
            reuse_query_threshold: 0.85,
            provenance_probe_threshold: 0.50,
            default_k: 5,
            embedding_dim: 768,
            embed_timeout_secs: 30,
            max_concurrent_resolutions: 8,
        }
    }
}

impl EngineConfig {
    /// Build from `STYLE_*` environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        read_f32("STYLE_DIRECT_HIT_THRESHOLD", &mut cfg.direct_hit_threshold);
        read_f32("STYLE_HINT_THRESHOLD", &mut cfg.hint_threshold);
        read_f32("STYLE_REUSE_QUERY_THRESHOLD", &mut cfg.reuse_query_threshold);
        read_f32(
            "STYLE_PROVENANCE_PROBE_THRESHOLD",
            &mut cfg.provenance_probe_threshold,
        );
        read_usize("STYLE_DEFAULT_K", &mut cfg.default_k);
        read_usize("STYLE_EMBEDDING_DIM", &mut cfg.embedding_dim);
        read_u64("STYLE_EMBED_TIMEOUT_SECS", &mut cfg.embed_timeout_secs);
        read_usize(
            "STYLE_MAX_CONCURRENT_RESOLUTIONS",
            &mut cfg.max_concurrent_resolutions,
        );
        cfg
    }
}

fn read_f32(key: &str, slot: &mut f32) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn read_usize(key: &str, slot: &mut usize) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn read_u64(key: &str, slot: &mut u64) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.direct_hit_threshold, 0.95);
        assert_eq!(cfg.hint_threshold, 0.70);
        assert_eq!(cfg.reuse_query_threshold, 0.85);
        assert_eq!(cfg.provenance_probe_threshold, 0.50);
        assert_eq!(cfg.embedding_dim, 768);
    }

    #[test]
    fn band_ordering_is_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.provenance_probe_threshold < cfg.hint_threshold);
        assert!(cfg.hint_threshold < cfg.reuse_query_threshold);
        assert!(cfg.reuse_query_threshold < cfg.direct_hit_threshold);
    }
}

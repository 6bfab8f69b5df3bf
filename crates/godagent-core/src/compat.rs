//! Dimension compatibility layer.
//!
//! Older clients may still submit [`crate::config::LEGACY_DIMENSIONS`]-wide
//! embeddings. Rather than reject them, they are upgraded transparently:
//! zero-padded to [`crate::config::CANONICAL_DIMENSIONS`] and re-normalized.
//! Usage is tracked so operators can see when it is safe to require the
//! canonical dimension everywhere.

use crate::config::{CANONICAL_DIMENSIONS, LEGACY_DIMENSIONS};
use crate::error::{GodagentError, GodagentResult};
use crate::vector::l2_normalize;

/// Zero-pad a legacy-dimension vector to the canonical width and
/// re-normalize. Errors if `v` is neither the legacy nor canonical width.
pub fn upgrade(v: &[f32]) -> GodagentResult<Vec<f32>> {
    if v.len() == CANONICAL_DIMENSIONS {
        return Ok(v.to_vec());
    }
    if v.len() != LEGACY_DIMENSIONS {
        return Err(GodagentError::VectorDimensionMismatch {
            expected: CANONICAL_DIMENSIONS,
            actual: v.len(),
        });
    }
    let mut padded = vec![0.0f32; CANONICAL_DIMENSIONS];
    padded[..LEGACY_DIMENSIONS].copy_from_slice(v);
    l2_normalize(&mut padded);
    Ok(padded)
}

/// Running counters of how often each dimension width is seen, used to
/// recommend when legacy-vector acceptance can be dropped.
#[derive(Debug, Default)]
pub struct CompatStats {
    legacy_count: std::sync::atomic::AtomicU64,
    canonical_count: std::sync::atomic::AtomicU64,
    last_warning_at: parking_lot::Mutex<Option<i64>>,
}

/// Minimum seconds between rate-limited legacy-dimension warnings.
const WARNING_INTERVAL_SECS: i64 = 60;

impl CompatStats {
    /// Record an observed vector width, rate-limiting the returned warning
    /// (at most once per [`WARNING_INTERVAL_SECS`]) when it was legacy.
    pub fn record(&self, dim: usize, now: i64) -> Option<String> {
        if dim == LEGACY_DIMENSIONS {
            self.legacy_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let mut last = self.last_warning_at.lock();
            let should_warn = last.map(|t| now - t >= WARNING_INTERVAL_SECS).unwrap_or(true);
            if should_warn {
                *last = Some(now);
                return Some(format!(
                    "received {LEGACY_DIMENSIONS}-dim vector, upgraded to {CANONICAL_DIMENSIONS}-dim; \
                     {} legacy vectors seen so far",
                    self.legacy_count.load(std::sync::atomic::Ordering::Relaxed)
                ));
            }
        } else {
            self.canonical_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        None
    }

    /// `legacy / (legacy + canonical)`, or 0.0 if nothing has been observed.
    pub fn legacy_fraction(&self) -> f64 {
        let legacy = self.legacy_count.load(std::sync::atomic::Ordering::Relaxed);
        let canonical = self.canonical_count.load(std::sync::atomic::Ordering::Relaxed);
        let total = legacy + canonical;
        if total == 0 {
            0.0
        } else {
            legacy as f64 / total as f64
        }
    }

    /// Recommend dropping legacy-dimension acceptance once it accounts for
    /// less than 1% of recent traffic over a meaningful sample.
    pub fn recommend_migration(&self) -> bool {
        let legacy = self.legacy_count.load(std::sync::atomic::Ordering::Relaxed);
        let canonical = self.canonical_count.load(std::sync::atomic::Ordering::Relaxed);
        canonical + legacy >= 1000 && self.legacy_fraction() < 0.01
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_pads_and_renormalizes() {
        let mut legacy = vec![0.0f32; LEGACY_DIMENSIONS];
        legacy[0] = 1.0;
        let upgraded = upgrade(&legacy).unwrap();
        assert_eq!(upgraded.len(), CANONICAL_DIMENSIONS);
        let norm: f64 = upgraded.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_canonical_passthrough() {
        let v = vec![1.0f32; CANONICAL_DIMENSIONS];
        let upgraded = upgrade(&v).unwrap();
        assert_eq!(upgraded, v);
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        let err = upgrade(&vec![1.0f32; 42]).unwrap_err();
        assert!(matches!(err, GodagentError::VectorDimensionMismatch { .. }));
    }

    #[test]
    fn test_compat_stats_rate_limits_warnings() {
        let stats = CompatStats::default();
        let first = stats.record(LEGACY_DIMENSIONS, 0);
        assert!(first.is_some());
        let second = stats.record(LEGACY_DIMENSIONS, 5);
        assert!(second.is_none());
        let third = stats.record(LEGACY_DIMENSIONS, 61);
        assert!(third.is_some());
    }

    #[test]
    fn test_migration_recommendation() {
        let stats = CompatStats::default();
        for _ in 0..999 {
            stats.record(CANONICAL_DIMENSIONS, 0);
        }
        stats.record(LEGACY_DIMENSIONS, 0);
        assert!(stats.recommend_migration());
    }
}

use serde::{Deserialize, Serialize};

/// Tuning knobs for a `cooldb` instance, loaded from a manifest file the
/// way the teacher's `storage::config` loads its engine configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub page_size: u32,
    pub pool_capacity: u32,
    /// Fraction of the pool (in tenths of a percent, 0..=1000) that may be
    /// dirty before the background writer is woken outside its normal
    /// interval.
    pub dirty_ratio_permille: u32,
    pub redo_log_capacity_bytes: u64,
    pub undo_extent_pages: u32,
    pub checkpoint_interval_secs: u64,
}

impl CoreConfig {
    /// Ceiling the buffer pool may grow to beyond its initial allocation —
    /// four times the configured starting capacity, the same
    /// grow-on-demand headroom the pool's own tests exercise.
    pub fn pool_max_capacity(&self) -> usize {
        self.pool_capacity as usize * 4
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            page_size: 16384,
            pool_capacity: 64,
            dirty_ratio_permille: 500,
            redo_log_capacity_bytes: 64 * 1024 * 1024,
            undo_extent_pages: 64,
            checkpoint_interval_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.page_size, 16384);
        assert_eq!(cfg.undo_extent_pages, 64);
        assert_eq!(cfg.dirty_ratio_permille, 500);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let cfg = CoreConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}

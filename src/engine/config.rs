// Salience Config: typed configuration, loaded once at startup
//
// Every tunable of the engine lives in `SalienceConfig`. It is built once
// (from a TOML file or defaults) and passed by reference into every
// component. Malformed or invariant-violating sources are logged and
// replaced with defaults; configuration problems never abort startup.

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Feature flags ──────────────────────────────────────────────────────────

/// Feature switches. All default to on; a flag is off only when set `false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureFlags {
    /// Event-driven decay in `batch_update_scores`.
    pub event_decay: bool,
    /// Pressure-aware budget sizing in the retrieval pipeline.
    pub pressure_policy: bool,
    /// Intent-weighted fusion instead of fixed weights.
    pub adaptive_fusion: bool,
    /// Prompt-context injection for resumed sessions.
    pub auto_resume: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self { event_decay: true, pressure_policy: true, adaptive_fusion: true, auto_resume: true }
    }
}

// ── Config struct ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SalienceConfig {
    pub token_budget: usize,

    pub decay_rate: f64,
    pub mention_boost: f64,
    pub decay_floor: f64,
    pub delete_threshold: f64,
    pub max_capacity: usize,
    pub session_timeout_secs: i64,

    pub default_window_secs: i64,
    pub max_window_secs: i64,

    pub region_diversity_threshold: f64,

    pub primary_threshold: f64,
    pub fallback_threshold: f64,

    pub pressure_focused: f64,
    pub pressure_quick: f64,

    /// `None` means 100%.
    pub rollout_percent: Option<u8>,
    pub validation_timeout_ms: u64,

    pub rrf_k: f64,
    pub convergence_bonus: f64,
    pub graph_weight_boost: f64,

    pub flags: FeatureFlags,
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            decay_rate: EVENT_DECAY_RATE,
            mention_boost: MENTION_BOOST,
            decay_floor: DECAY_FLOOR,
            delete_threshold: DELETE_THRESHOLD,
            max_capacity: WORKING_MEMORY_CAPACITY,
            session_timeout_secs: SESSION_TIMEOUT_SECS,
            default_window_secs: DEFAULT_TEMPORAL_WINDOW_SECS,
            max_window_secs: MAX_TEMPORAL_WINDOW_SECS,
            region_diversity_threshold: REGION_DIVERSITY_THRESHOLD,
            primary_threshold: PRIMARY_SIMILARITY_THRESHOLD,
            fallback_threshold: FALLBACK_SIMILARITY_THRESHOLD,
            pressure_focused: PRESSURE_FOCUSED_RATIO,
            pressure_quick: PRESSURE_QUICK_RATIO,
            rollout_percent: None,
            validation_timeout_ms: VALIDATION_TIMEOUT_MS,
            rrf_k: RRF_K,
            convergence_bonus: CONVERGENCE_BONUS,
            graph_weight_boost: GRAPH_WEIGHT_BOOST,
            flags: FeatureFlags::default(),
        }
    }
}

// ── Path helpers ───────────────────────────────────────────────────────────

/// Returns the default config path: `<config_dir>/engram-salience/salience.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

// ── Loading ────────────────────────────────────────────────────────────────

impl SalienceConfig {
    /// Effective rollout percentage, capped at 100.
    pub fn rollout(&self) -> u8 {
        self.rollout_percent.unwrap_or(DEFAULT_ROLLOUT_PERCENT).min(100)
    }

    /// Strict parse + validation. Used by the lenient loaders below.
    pub fn parse(content: &str) -> EngineResult<Self> {
        let cfg: SalienceConfig =
            toml::from_str(content).map_err(|e| EngineError::Config(format!("TOML parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML string; fall back to defaults (with a warning) on any error.
    pub fn from_toml_str(content: &str) -> Self {
        match Self::parse(content) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!("[engram:config] {}; using built-in defaults", e);
                Self::default()
            }
        }
    }

    /// Load from a file. A missing file yields defaults silently; an
    /// unreadable or invalid one yields defaults with a warning.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("[engram:config] No config at {}, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg = Self::from_toml_str(&content);
                log::info!("[engram:config] Loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                log::warn!("[engram:config] Failed to read {}: {}; using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load from `default_config_path()`, or defaults if there is none.
    pub fn load_default() -> Self {
        match default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                log::warn!("[engram:config] Could not determine config directory");
                Self::default()
            }
        }
    }

    /// Check numeric invariants.
    pub fn validate(&self) -> EngineResult<()> {
        let unit = [
            ("decay_rate", self.decay_rate),
            ("mention_boost", self.mention_boost),
            ("decay_floor", self.decay_floor),
            ("delete_threshold", self.delete_threshold),
            ("region_diversity_threshold", self.region_diversity_threshold),
            ("primary_threshold", self.primary_threshold),
            ("fallback_threshold", self.fallback_threshold),
            ("pressure_focused", self.pressure_focused),
            ("pressure_quick", self.pressure_quick),
            ("convergence_bonus", self.convergence_bonus),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!("{name} = {value} is outside [0, 1]")));
            }
        }
        if self.decay_floor <= self.delete_threshold {
            return Err(EngineError::Config(format!(
                "decay_floor ({}) must be greater than delete_threshold ({})",
                self.decay_floor, self.delete_threshold
            )));
        }
        if self.fallback_threshold > self.primary_threshold {
            return Err(EngineError::Config(format!(
                "fallback_threshold ({}) must not exceed primary_threshold ({})",
                self.fallback_threshold, self.primary_threshold
            )));
        }
        if self.pressure_focused > self.pressure_quick {
            return Err(EngineError::Config("pressure_focused must not exceed pressure_quick".into()));
        }
        if self.default_window_secs <= 0 || self.max_window_secs < self.default_window_secs {
            return Err(EngineError::Config("temporal windows must satisfy 0 < default <= max".into()));
        }
        if self.max_capacity == 0 {
            return Err(EngineError::Config("max_capacity must be at least 1".into()));
        }
        if self.rrf_k <= 0.0 || !self.rrf_k.is_finite() {
            return Err(EngineError::Config("rrf_k must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = SalienceConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.token_budget, 2000);
        assert_eq!(cfg.rollout(), 100);
        assert!(cfg.flags.event_decay);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = SalienceConfig::from_toml_str(
            "token_budget = 4000\nrollout_percent = 25\n[flags]\nevent_decay = false\n",
        );
        assert_eq!(cfg.token_budget, 4000);
        assert_eq!(cfg.rollout(), 25);
        assert!(!cfg.flags.event_decay);
        assert!(cfg.flags.adaptive_fusion);
        assert_eq!(cfg.decay_rate, 0.85);
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let cfg = SalienceConfig::from_toml_str("token_budget = \"lots\"");
        assert_eq!(cfg, SalienceConfig::default());
    }

    #[test]
    fn floor_below_delete_threshold_rejected() {
        let err = SalienceConfig::parse("decay_floor = 0.01\ndelete_threshold = 0.02").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        let cfg = SalienceConfig::from_toml_str("decay_floor = 0.01\ndelete_threshold = 0.02");
        assert_eq!(cfg.decay_floor, 0.05);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        assert!(SalienceConfig::parse("primary_threshold = 0.1\nfallback_threshold = 0.2").is_err());
    }

    #[test]
    fn load_reads_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert_eq!(SalienceConfig::load(&missing), SalienceConfig::default());

        let path = dir.path().join("salience.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "max_capacity = 9").unwrap();
        let cfg = SalienceConfig::load(&path);
        assert_eq!(cfg.max_capacity, 9);
    }

    #[test]
    fn rollout_capped_at_hundred() {
        let cfg = SalienceConfig { rollout_percent: Some(250), ..Default::default() };
        assert_eq!(cfg.rollout(), 100);
    }
}

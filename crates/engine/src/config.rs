use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Engine tuning parameters, loaded from a `lettra.toml`.
///
/// Every field has a default matching the shipped behavior, so an empty
/// file (or no file at all) yields a working engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub matching: MatchConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MatchConfig {
    /// Amount tolerance in basis points of the invoice total.
    #[serde(default = "default_tolerance_bps")]
    pub tolerance_bps: i64,
    /// Tolerance never goes below this many minor units, so sub-minor
    /// rounding on small invoices still passes.
    #[serde(default = "default_tolerance_floor_minor")]
    pub tolerance_floor_minor: i64,
    /// Days either side of the transaction date that count as proximate.
    #[serde(default = "default_date_window_days")]
    pub date_window_days: i64,
    /// Minimum token length for the description↔client-name overlap rule.
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,
    /// Candidates kept per transaction, best first.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_tolerance_bps() -> i64 {
    50 // 0.5%, absorbs processor fee rounding
}

fn default_tolerance_floor_minor() -> i64 {
    1
}

fn default_date_window_days() -> i64 {
    45
}

fn default_min_token_len() -> usize {
    3
}

fn default_max_candidates() -> usize {
    5
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tolerance_bps: default_tolerance_bps(),
            tolerance_floor_minor: default_tolerance_floor_minor(),
            date_window_days: default_date_window_days(),
            min_token_len: default_min_token_len(),
            max_candidates: default_max_candidates(),
        }
    }
}

impl MatchConfig {
    /// Absolute amount tolerance for an invoice total, in minor units.
    pub fn tolerance_for(&self, total_ttc_minor: i64) -> i64 {
        let proportional = total_ttc_minor.abs() * self.tolerance_bps / 10_000;
        proportional.max(self.tolerance_floor_minor)
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// While a shown suggestion is younger than this, nothing new is emitted.
    /// Matches the presentation layer's auto-hide window.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
    /// How many times an unanswered suggestion may return to `New` after its
    /// cool-down expires.
    #[serde(default = "default_max_resurfaces")]
    pub max_resurfaces: u32,
}

fn default_cooldown_secs() -> i64 {
    30
}

fn default_max_resurfaces() -> u32 {
    1
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            max_resurfaces: default_max_resurfaces(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, String> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| format!("config parse error: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.matching.tolerance_bps < 0 || self.matching.tolerance_bps > 10_000 {
            return Err(format!(
                "matching.tolerance_bps must be in 0..=10000, got {}",
                self.matching.tolerance_bps
            ));
        }
        if self.matching.tolerance_floor_minor < 0 {
            return Err("matching.tolerance_floor_minor must be >= 0".into());
        }
        if self.matching.date_window_days < 0 {
            return Err("matching.date_window_days must be >= 0".into());
        }
        if self.matching.min_token_len == 0 {
            return Err("matching.min_token_len must be >= 1".into());
        }
        if self.matching.max_candidates == 0 {
            return Err("matching.max_candidates must be >= 1".into());
        }
        if self.delivery.cooldown_secs < 0 {
            return Err("delivery.cooldown_secs must be >= 0".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

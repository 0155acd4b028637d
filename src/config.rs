use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Duplicate detection thresholds
    pub detection: DetectionConfig,

    /// Merge protocol settings
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minimum combined similarity for a fuzzy name pair
    pub fuzzy_name_threshold: f64,

    /// Last-name similarity below this short-circuits the fuzzy score to zero
    pub last_name_floor: f64,

    /// First-name score granted when two different names share a nickname canonical form
    pub nickname_first_name_score: f64,

    /// Digits required before a phone number counts as a signal
    pub phone_min_digits: usize,

    /// Digits required before a Baylor ID counts as a signal
    pub baylor_id_min_digits: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fuzzy_name_threshold: 0.85,
            last_name_floor: 0.8,
            nickname_first_name_score: 0.95,
            phone_min_digits: 10,
            baylor_id_min_digits: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Page size for reference-reassignment scans
    pub page_size: usize,

    /// Maximum mergedInto hops before a chain is treated as corrupt
    pub max_chain_hops: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_chain_hops: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `ROSTER_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = EngineConfig::default();

        if let Ok(threshold) = env::var("ROSTER_FUZZY_NAME_THRESHOLD") {
            config.detection.fuzzy_name_threshold = threshold
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ROSTER_FUZZY_NAME_THRESHOLD: {e}"))?;
        }
        if let Ok(floor) = env::var("ROSTER_LAST_NAME_FLOOR") {
            config.detection.last_name_floor = floor
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ROSTER_LAST_NAME_FLOOR: {e}"))?;
        }
        if let Ok(score) = env::var("ROSTER_NICKNAME_FIRST_NAME_SCORE") {
            config.detection.nickname_first_name_score = score
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ROSTER_NICKNAME_FIRST_NAME_SCORE: {e}"))?;
        }
        if let Ok(digits) = env::var("ROSTER_PHONE_MIN_DIGITS") {
            config.detection.phone_min_digits = digits
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ROSTER_PHONE_MIN_DIGITS: {e}"))?;
        }
        if let Ok(digits) = env::var("ROSTER_BAYLOR_ID_MIN_DIGITS") {
            config.detection.baylor_id_min_digits = digits
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ROSTER_BAYLOR_ID_MIN_DIGITS: {e}"))?;
        }
        if let Ok(page_size) = env::var("ROSTER_MERGE_PAGE_SIZE") {
            config.merge.page_size = page_size
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ROSTER_MERGE_PAGE_SIZE: {e}"))?;
        }
        if let Ok(hops) = env::var("ROSTER_MAX_CHAIN_HOPS") {
            config.merge.max_chain_hops = hops
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ROSTER_MAX_CHAIN_HOPS: {e}"))?;
        }

        Ok(config)
    }
}

//! TOML configuration for `autofdo.toml`.
//!
//! All keys live in an optional `[autofdo]` table and every key has a default,
//! so an empty file (or no file) gives the stock behavior.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_PROFILE_FILE: &str = "fbdata.afdo";

/// Knobs of the profile consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AutoFdoConfig {
    /// Profile to read
    pub profile_file: PathBuf,
    /// Upper bound on edge propagation rounds per function
    pub max_propagate_iterations: u32,
    /// Upper bound on promote-then-inline rounds per function
    pub early_inliner_max_iterations: u32,
    /// Maximum number of modules in a group, primary included (0 = unlimited)
    pub max_module_group_size: u32,
    /// Emit `name:total:annotated` coverage records
    pub record_coverage_in_output: bool,
    /// Emit branch-annotation comparison records
    pub check_branch_annotation: bool,
    /// Minimum block count for a branch-annotation record
    pub check_branch_annotation_threshold: u64,
    /// Attach indirect-call histograms and let the host act on them
    pub value_profile_transformations: bool,
    /// A promoted target is stale once the unpromoted targets reach this
    /// fraction of the call site count
    pub promotion_refresh_threshold: f64,
    /// Working-set permille used to pick the hot count threshold
    pub hot_bb_count_ws_permille: u32,
    /// Select auxiliary modules for cross-module optimization
    pub dyn_ipa: bool,
    /// Reject auxiliary modules containing assembler statements
    pub disallow_asm_modules: bool,
}

impl Default for AutoFdoConfig {
    fn default() -> Self {
        Self {
            profile_file: PathBuf::from(DEFAULT_PROFILE_FILE),
            max_propagate_iterations: 100,
            early_inliner_max_iterations: 1,
            max_module_group_size: 0,
            record_coverage_in_output: false,
            check_branch_annotation: false,
            check_branch_annotation_threshold: 0,
            value_profile_transformations: true,
            promotion_refresh_threshold: 0.5,
            hot_bb_count_ws_permille: 999,
            dyn_ipa: false,
            disallow_asm_modules: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    autofdo: Option<AutoFdoConfig>,
}

impl AutoFdoConfig {
    /// Read and parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        parse_config(&content)
    }

    /// Same configuration reading a different profile.
    pub fn with_profile_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_file = path.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.hot_bb_count_ws_permille > 1000 {
            return Err(format!(
                "hot-bb-count-ws-permille must be at most 1000, got {}",
                self.hot_bb_count_ws_permille
            ));
        }
        if !(0.0..=1.0).contains(&self.promotion_refresh_threshold) {
            return Err(format!(
                "promotion-refresh-threshold must be within 0.0..=1.0, got {}",
                self.promotion_refresh_threshold
            ));
        }
        Ok(())
    }
}

/// Parse an `autofdo.toml` string.
pub fn parse_config(content: &str) -> Result<AutoFdoConfig, String> {
    let raw: RawConfig =
        toml::from_str(content).map_err(|e| format!("Failed to parse autofdo.toml: {}", e))?;
    let config = raw.autofdo.unwrap_or_default();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, AutoFdoConfig::default());
        assert_eq!(config.profile_file, PathBuf::from("fbdata.afdo"));
        assert_eq!(config.max_propagate_iterations, 100);
        assert_eq!(config.hot_bb_count_ws_permille, 999);
    }

    #[test]
    fn test_partial_table() {
        let toml = r#"
[autofdo]
profile-file = "perf.afdo"
early-inliner-max-iterations = 3
record-coverage-in-output = true
promotion-refresh-threshold = 0.25
"#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.profile_file, PathBuf::from("perf.afdo"));
        assert_eq!(config.early_inliner_max_iterations, 3);
        assert!(config.record_coverage_in_output);
        assert_eq!(config.promotion_refresh_threshold, 0.25);
        assert!(config.value_profile_transformations);
    }

    #[test]
    fn test_rejects_bad_permille() {
        let toml = "[autofdo]\nhot-bb-count-ws-permille = 1200\n";
        let err = parse_config(toml).unwrap_err();
        assert!(err.contains("hot-bb-count-ws-permille"));
    }

    #[test]
    fn test_rejects_unparseable() {
        assert!(parse_config("[autofdo\n").is_err());
    }
}

//! Process-wide configuration.
//!
//! [`Config`] collects every tunable named across the storage engine and the
//! ingest server into one plain record. Defaults match the reference
//! deployment; any field may be overridden by a `HISSER_<KEY>` environment
//! variable via [`Config::apply_env_overrides`]. Loading a configuration
//! *file* (TOML/YAML/INI) and CLI argument parsing are out of scope here —
//! both are treated as the caller's responsibility.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Errors raised while building or validating a [`Config`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// An environment override could not be parsed into the target field type.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// A retention list failed the ordering/multiple-of checks from §7.
    #[error("invalid retentions: {0}")]
    InvalidRetentions(String),

    /// A required field was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// A single aggregation rule: a regex pattern and the method applied to
/// metric names it matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggRuleConfig {
    pub pattern: String,
    pub method: String,
}

/// One `(resolution_seconds, retention_seconds)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub resolution: u32,
    pub retention: u32,
}

/// Every tunable parameter this crate's components read.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root directory holding per-resolution block subdirectories.
    pub data_dir: String,

    /// Ascending list of `(resolution, retention)`, lowest resolution first.
    pub retentions: Vec<Retention>,

    /// Carbon line-protocol TCP listen address.
    pub carbon_bind: String,

    /// Carbon line-protocol UDP listen address.
    pub carbon_bind_udp: String,

    /// Link RPC listen address.
    pub link_bind: String,

    /// Buffer flush size `F`, in points per metric.
    pub buffer_flush_size: u32,

    /// Buffer compaction trigger ratio.
    pub buffer_compact_ratio: f64,

    /// Merge planner: maximum segment size, in blocks-worth of resolution units.
    pub merge_max_size: u32,

    /// Merge planner: maximum allowed gap between adjacent blocks, in resolution units.
    pub merge_max_gap_size: u32,

    /// Merge planner: descending-split ratio threshold for the final segment.
    pub merge_ratio: f64,

    /// Downsample planner: maximum gap, in target-resolution units.
    pub downsample_max_gap: u32,

    /// Downsample planner: minimum segment duration, in target-resolution units.
    pub downsample_min_size: u32,

    /// Downsample planner: maximum segment duration, in source-resolution units.
    pub downsample_max_size: u32,

    /// Ordered aggregation rules, evaluated first match wins.
    pub agg_rules: Vec<AggRuleConfig>,

    /// Aggregation method applied when no rule matches.
    pub agg_default_method: String,

    /// Seconds between retention cleanup passes.
    pub retention_check_interval: u32,

    /// Number of worker threads the task manager may run concurrently (one per task kind).
    pub task_manager_workers: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "/var/lib/hisser".to_string(),
            retentions: vec![
                Retention {
                    resolution: 1,
                    retention: 60 * 60 * 24,
                },
                Retention {
                    resolution: 60,
                    retention: 60 * 60 * 24 * 30,
                },
                Retention {
                    resolution: 3600,
                    retention: 60 * 60 * 24 * 365,
                },
            ],
            carbon_bind: "0.0.0.0:2003".to_string(),
            carbon_bind_udp: "0.0.0.0:2003".to_string(),
            link_bind: "127.0.0.1:2005".to_string(),
            buffer_flush_size: 600,
            buffer_compact_ratio: 2.0,
            merge_max_size: 2000,
            merge_max_gap_size: 5,
            merge_ratio: 3.0,
            downsample_max_gap: 5,
            downsample_min_size: 2,
            downsample_max_size: 2000,
            agg_rules: Vec::new(),
            agg_default_method: "avg".to_string(),
            retention_check_interval: 300,
            task_manager_workers: 4,
        }
    }
}

impl Config {
    /// Applies `HISSER_<KEY>` environment overrides in place.
    ///
    /// Unset variables leave the current value untouched. The first
    /// unparsable value aborts with a [`ConfigError::InvalidValue`].
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(&env::vars().collect())
    }

    /// Same as [`Config::apply_env_overrides`] but reads from a supplied map,
    /// so tests do not have to mutate the real process environment.
    pub fn apply_env_overrides_from(
        &mut self,
        vars: &HashMap<String, String>,
    ) -> Result<(), ConfigError> {
        macro_rules! parse_field {
            ($key:literal, $field:expr, $parse:expr) => {
                if let Some(raw) = vars.get($key) {
                    $field = $parse(raw.as_str()).map_err(|reason: String| {
                        ConfigError::InvalidValue {
                            key: $key,
                            value: raw.clone(),
                            reason,
                        }
                    })?;
                }
            };
        }

        if let Some(raw) = vars.get("HISSER_DATA_DIR") {
            self.data_dir = raw.clone();
        }
        if let Some(raw) = vars.get("HISSER_RETENTIONS") {
            self.retentions = parse_retentions(raw).map_err(|reason| ConfigError::InvalidValue {
                key: "HISSER_RETENTIONS",
                value: raw.clone(),
                reason,
            })?;
        }
        if let Some(raw) = vars.get("HISSER_CARBON_BIND") {
            self.carbon_bind = raw.clone();
        }
        if let Some(raw) = vars.get("HISSER_CARBON_BIND_UDP") {
            self.carbon_bind_udp = raw.clone();
        }
        if let Some(raw) = vars.get("HISSER_LINK_BIND") {
            self.link_bind = raw.clone();
        }
        parse_field!("HISSER_BUFFER_FLUSH_SIZE", self.buffer_flush_size, |s: &str| s
            .parse::<u32>()
            .map_err(|e| e.to_string()));
        parse_field!(
            "HISSER_BUFFER_COMPACT_RATIO",
            self.buffer_compact_ratio,
            |s: &str| s.parse::<f64>().map_err(|e| e.to_string())
        );
        parse_field!("HISSER_MERGE_MAX_SIZE", self.merge_max_size, |s: &str| s
            .parse::<u32>()
            .map_err(|e| e.to_string()));
        parse_field!(
            "HISSER_MERGE_MAX_GAP_SIZE",
            self.merge_max_gap_size,
            |s: &str| s.parse::<u32>().map_err(|e| e.to_string())
        );
        parse_field!("HISSER_MERGE_RATIO", self.merge_ratio, |s: &str| s
            .parse::<f64>()
            .map_err(|e| e.to_string()));
        parse_field!(
            "HISSER_DOWNSAMPLE_MAX_GAP",
            self.downsample_max_gap,
            |s: &str| s.parse::<u32>().map_err(|e| e.to_string())
        );
        parse_field!(
            "HISSER_DOWNSAMPLE_MIN_SIZE",
            self.downsample_min_size,
            |s: &str| s.parse::<u32>().map_err(|e| e.to_string())
        );
        parse_field!(
            "HISSER_DOWNSAMPLE_MAX_SIZE",
            self.downsample_max_size,
            |s: &str| s.parse::<u32>().map_err(|e| e.to_string())
        );
        if let Some(raw) = vars.get("HISSER_AGG_DEFAULT_METHOD") {
            self.agg_default_method = raw.clone();
        }
        parse_field!(
            "HISSER_RETENTION_CHECK_INTERVAL",
            self.retention_check_interval,
            |s: &str| s.parse::<u32>().map_err(|e| e.to_string())
        );
        parse_field!(
            "HISSER_TASK_MANAGER_WORKERS",
            self.task_manager_workers,
            |s: &str| s.parse::<u32>().map_err(|e| e.to_string())
        );

        // AGG_RULE_<n> = "<pattern>:<method>", scanned until the first gap.
        let mut idx = 0;
        let mut rules = Vec::new();
        loop {
            let key = format!("HISSER_AGG_RULE_{idx}");
            let Some(raw) = vars.get(&key) else {
                break;
            };
            let (pattern, method) = raw.rsplit_once(':').ok_or_else(|| ConfigError::InvalidValue {
                key: "HISSER_AGG_RULE_<n>",
                value: raw.clone(),
                reason: "expected <pattern>:<method>".to_string(),
            })?;
            rules.push(AggRuleConfig {
                pattern: pattern.to_string(),
                method: method.to_string(),
            });
            idx += 1;
        }
        if !rules.is_empty() {
            self.agg_rules = rules;
        }

        Ok(())
    }

    /// Startup validation per §7: non-empty, ascending, multiple-of resolutions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.trim().is_empty() {
            return Err(ConfigError::Empty("data_dir"));
        }
        if self.retentions.is_empty() {
            return Err(ConfigError::InvalidRetentions(
                "at least one retention is required".to_string(),
            ));
        }
        let lowest = self.retentions[0].resolution;
        let mut prev = 0u32;
        for r in &self.retentions {
            if r.resolution <= prev {
                return Err(ConfigError::InvalidRetentions(
                    "resolutions must be strictly ascending".to_string(),
                ));
            }
            if r.resolution % lowest != 0 {
                return Err(ConfigError::InvalidRetentions(format!(
                    "resolution {} is not a multiple of the lowest resolution {}",
                    r.resolution, lowest
                )));
            }
            prev = r.resolution;
        }
        Ok(())
    }
}

fn parse_retentions(raw: &str) -> Result<Vec<Retention>, String> {
    raw.split(',')
        .map(|part| {
            let (res, ret) = part
                .split_once(':')
                .ok_or_else(|| format!("expected <resolution>:<retention>, got {part:?}"))?;
            Ok(Retention {
                resolution: res.trim().parse().map_err(|_| format!("bad resolution {res:?}"))?,
                retention: ret.trim().parse().map_err(|_| format!("bad retention {ret:?}"))?,
            })
        })
        .collect()
}

//! Sink configuration.
//!
//! Values come from code (builder-style setters) or from `ARCO_SINK_*`
//! environment variables via [`SinkConfig::from_env`].

use std::fmt;
use std::str::FromStr;

use arco_core::{Error, Result, ScalarValue};
use serde::{Deserialize, Serialize};

/// Strategy for routing rows to parallel writer tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMode {
    /// No shuffle by table layout; rows are spread by equality key.
    #[default]
    None,
    /// Rows are sharded by hashing the partition source columns.
    Hash,
    /// Rows are sharded by value ranges of a single column.
    Range,
}

impl DistributionMode {
    /// Returns the lowercase configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Hash => "hash",
            Self::Range => "range",
        }
    }
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "hash" => Ok(Self::Hash),
            "range" => Ok(Self::Range),
            other => Err(Error::InvalidInput(format!(
                "unknown distribution mode '{other}' (expected none|hash|range)"
            ))),
        }
    }
}

/// Changelog sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SinkConfig {
    /// Ordered columns defining row identity. Empty means the whole row.
    pub equality_field_columns: Vec<String>,
    /// Whether inserts replace any existing row with the same key.
    pub upsert: bool,
    /// Routing strategy for parallel writer tasks.
    pub distribution_mode: DistributionMode,
    /// Number of independent writer tasks.
    pub write_parallelism: usize,
    /// Branch of the snapshot history to commit into.
    pub target_branch: String,
    /// Commit retries after a conflicting first attempt.
    pub max_commit_retries: u32,
    /// Delay between conflicting commit attempts, in milliseconds.
    pub commit_retry_backoff_ms: u64,
    /// Identifier recorded on every snapshot this sink commits.
    pub job_id: String,
    /// Ordered split points for RANGE routing.
    pub range_bounds: Vec<ScalarValue>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            equality_field_columns: Vec::new(),
            upsert: false,
            distribution_mode: DistributionMode::None,
            write_parallelism: 1,
            target_branch: "main".to_string(),
            max_commit_retries: 4,
            commit_retry_backoff_ms: 100,
            job_id: ulid::Ulid::new().to_string(),
            range_bounds: Vec::new(),
        }
    }
}

impl SinkConfig {
    /// Loads configuration from `ARCO_SINK_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a variable is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a variable is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = EnvVars { lookup: &lookup };
        let mut config = Self::default();

        if let Some(fields) = vars.string("ARCO_SINK_EQUALITY_FIELDS") {
            config.equality_field_columns = parse_column_list(&fields);
        }
        if let Some(upsert) = vars.bool("ARCO_SINK_UPSERT")? {
            config.upsert = upsert;
        }
        if let Some(mode) = vars.string("ARCO_SINK_DISTRIBUTION_MODE") {
            config.distribution_mode = mode.parse()?;
        }
        if let Some(parallelism) = vars.usize("ARCO_SINK_WRITE_PARALLELISM")? {
            config.write_parallelism = parallelism;
        }
        if let Some(branch) = vars.string("ARCO_SINK_TARGET_BRANCH") {
            config.target_branch = branch;
        }
        if let Some(retries) = vars.u32("ARCO_SINK_MAX_COMMIT_RETRIES")? {
            config.max_commit_retries = retries;
        }
        if let Some(backoff) = vars.u64("ARCO_SINK_COMMIT_RETRY_BACKOFF_MS")? {
            config.commit_retry_backoff_ms = backoff;
        }
        if let Some(job_id) = vars.string("ARCO_SINK_JOB_ID") {
            config.job_id = job_id;
        }
        if let Some(bounds) = vars.string("ARCO_SINK_RANGE_BOUNDS") {
            config.range_bounds = parse_range_bounds(&bounds);
        }

        Ok(config)
    }

    /// Sets the equality field columns.
    #[must_use]
    pub fn with_equality_fields<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.equality_field_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables upsert mode.
    #[must_use]
    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Sets the distribution mode.
    #[must_use]
    pub fn with_distribution_mode(mut self, mode: DistributionMode) -> Self {
        self.distribution_mode = mode;
        self
    }

    /// Sets the number of writer tasks.
    #[must_use]
    pub fn with_write_parallelism(mut self, parallelism: usize) -> Self {
        self.write_parallelism = parallelism;
        self
    }

    /// Sets the target branch.
    #[must_use]
    pub fn with_target_branch(mut self, branch: impl Into<String>) -> Self {
        self.target_branch = branch.into();
        self
    }

    /// Sets the commit retry budget.
    #[must_use]
    pub fn with_max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries;
        self
    }

    /// Sets the backoff between conflicting commit attempts.
    #[must_use]
    pub fn with_commit_retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.commit_retry_backoff_ms = backoff_ms;
        self
    }

    /// Sets the job id recorded on committed snapshots.
    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    /// Sets the RANGE routing split points.
    #[must_use]
    pub fn with_range_bounds(mut self, bounds: Vec<ScalarValue>) -> Self {
        self.range_bounds = bounds;
        self
    }
}

fn parse_column_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Integers become `Int64` bounds, anything else a string bound.
fn parse_range_bounds(value: &str) -> Vec<ScalarValue> {
    parse_column_list(value)
        .into_iter()
        .map(|bound| match bound.parse::<i64>() {
            Ok(n) => ScalarValue::Int64(n),
            Err(_) => ScalarValue::String(bound),
        })
        .collect()
}

struct EnvVars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvVars<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Ok(Some(true)),
            "false" | "0" | "no" | "n" => Ok(Some(false)),
            _ => Err(Error::InvalidInput(format!(
                "{name} must be a boolean (true/false/1/0)"
            ))),
        }
    }

    fn usize(&self, name: &str) -> Result<Option<usize>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<usize>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
    }

    fn u32(&self, name: &str) -> Result<Option<u32>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u32>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
    }
}

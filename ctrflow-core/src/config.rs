//! Job configuration.
//!
//! A job is configured from a TOML file with one table per concern:
//!
//! ```toml
//! [pipeline]
//! window_size = "30s"
//! join_bound = "15s"
//! allowed_lateness = "5s"
//! checkpoint_interval = "30s"
//! parallelism = 2
//! denominator = "joined"
//!
//! [schema]
//! impression_id = "impr_id"
//!
//! [source]
//! impressions = "data/impressions.jsonl"
//! clicks = "data/clicks.jsonl"
//!
//! [sink]
//! output_dir = "output/ctr_results"
//!
//! [checkpoint]
//! dir = "checkpoints"
//! ```
//!
//! Durations are humantime strings (`"250ms"`, `"30s"`, `"1m 30s"`). Every
//! key is optional and falls back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::EventTime;

/// Which impressions count in the CTR denominator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Denominator {
    /// Only impressions that produced at least one joined pair (inner join).
    #[default]
    Joined,
    /// Every admitted impression, clicked or not.
    AllImpressions,
}

/// Engine settings: time semantics, parallelism, checkpointing and sink retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(with = "duration_str")]
    pub window_size: Duration,
    #[serde(with = "duration_str")]
    pub join_bound: Duration,
    #[serde(with = "duration_str")]
    pub allowed_lateness: Duration,
    #[serde(with = "duration_str")]
    pub checkpoint_interval: Duration,
    #[serde(with = "duration_str")]
    pub checkpoint_timeout: Duration,
    pub retained_checkpoints: usize,
    pub parallelism: usize,
    pub channel_capacity: usize,
    /// Records a barrier-aligning task may buffer before the checkpoint aborts.
    pub max_alignment_buffer: usize,
    pub sink_max_attempts: u32,
    #[serde(with = "duration_str")]
    pub sink_retry_backoff: Duration,
    pub denominator: Denominator,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: Duration::from_secs(30),
            join_bound: Duration::from_secs(15),
            allowed_lateness: Duration::from_secs(5),
            checkpoint_interval: Duration::from_secs(30),
            checkpoint_timeout: Duration::from_secs(60),
            retained_checkpoints: 3,
            parallelism: 1,
            channel_capacity: 1024,
            max_alignment_buffer: 10_000,
            sink_max_attempts: 3,
            sink_retry_backoff: Duration::from_millis(200),
            denominator: Denominator::Joined,
        }
    }
}

impl PipelineConfig {
    pub fn window_size_ms(&self) -> EventTime {
        self.window_size.as_millis() as EventTime
    }

    pub fn join_bound_ms(&self) -> EventTime {
        self.join_bound.as_millis() as EventTime
    }

    /// Check the settings before a job is built.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.window_size.as_secs() == 0 || self.window_size.subsec_nanos() != 0 {
            // CSV output carries window bounds at second precision.
            return Err(PipelineError::config(
                "window_size must be a whole number of seconds",
            ));
        }
        if self.window_size.as_millis() > i64::MAX as u128 / 2
            || self.join_bound.as_millis() > i64::MAX as u128 / 2
            || self.allowed_lateness.as_millis() > i64::MAX as u128 / 2
        {
            return Err(PipelineError::config("time bounds are out of range"));
        }
        if self.checkpoint_interval.is_zero() {
            return Err(PipelineError::config("checkpoint_interval must be positive"));
        }
        if self.checkpoint_timeout.is_zero() {
            return Err(PipelineError::config("checkpoint_timeout must be positive"));
        }
        if self.retained_checkpoints == 0 {
            return Err(PipelineError::config(
                "retained_checkpoints must be at least 1",
            ));
        }
        if self.parallelism == 0 {
            return Err(PipelineError::config("parallelism must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(PipelineError::config("channel_capacity must be at least 1"));
        }
        if self.max_alignment_buffer == 0 {
            return Err(PipelineError::config(
                "max_alignment_buffer must be at least 1",
            ));
        }
        if self.sink_max_attempts == 0 {
            return Err(PipelineError::config("sink_max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Field names of the two JSON input streams.
///
/// Defaults match the records written by the synthetic producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    pub impression_id: String,
    pub campaign_id: String,
    pub impression_time: String,
    pub click_id: String,
    /// Field of a click that references the impression.
    pub click_impression_id: String,
    pub click_time: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            impression_id: "impr_id".to_string(),
            campaign_id: "campaign_id".to_string(),
            impression_time: "ts".to_string(),
            click_id: "click_id".to_string(),
            click_impression_id: "impr_id".to_string(),
            click_time: "ts".to_string(),
        }
    }
}

impl SchemaConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fields = [
            ("impression_id", &self.impression_id),
            ("campaign_id", &self.campaign_id),
            ("impression_time", &self.impression_time),
            ("click_id", &self.click_id),
            ("click_impression_id", &self.click_impression_id),
            ("click_time", &self.click_time),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(PipelineError::config(format!(
                    "schema field `{name}` must not be empty"
                )));
            }
        }
        let impression = [&self.impression_id, &self.campaign_id, &self.impression_time];
        if impression[0] == impression[1]
            || impression[0] == impression[2]
            || impression[1] == impression[2]
        {
            return Err(PipelineError::config(
                "impression schema maps two columns to the same field",
            ));
        }
        let click = [&self.click_id, &self.click_impression_id, &self.click_time];
        if click[0] == click[1] || click[0] == click[2] || click[1] == click[2] {
            return Err(PipelineError::config(
                "click schema maps two columns to the same field",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub impressions: Option<PathBuf>,
    pub clicks: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SinkConfig {
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    pub dir: Option<PathBuf>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub pipeline: PipelineConfig,
    pub schema: SchemaConfig,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub checkpoint: CheckpointConfig,
}

impl JobConfig {
    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from TOML text. Parse errors and invalid values
    /// are reported as [`PipelineError::Configuration`].
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: JobConfig =
            toml::from_str(content).map_err(|e| PipelineError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.pipeline.validate()?;
        self.schema.validate()
    }
}

/// Serde adapter for humantime duration strings.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

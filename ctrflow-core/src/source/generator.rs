use super::*;

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Settings of the synthetic producer.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub impressions_per_second: u32,
    /// Probability that an impression is followed by a click.
    pub click_probability: f64,
    /// Clicks follow their impression after a whole number of seconds in
    /// `0..=max_click_delay`.
    pub max_click_delay: Duration,
    pub campaigns: Vec<String>,
    /// Event time of the first impression.
    pub start_time: EventTime,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            impressions_per_second: 5,
            click_probability: 0.25,
            max_click_delay: Duration::from_secs(10),
            campaigns: vec![
                "campaign-1".to_string(),
                "campaign-2".to_string(),
                "campaign-3".to_string(),
            ],
            start_time: 0,
            seed: 0xC7F1,
        }
    }
}

/// An impression as written by the producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProducedImpression {
    pub impr_id: String,
    pub user_id: String,
    pub campaign_id: String,
    pub ts: EventTime,
}

/// A click as written by the producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProducedClick {
    pub click_id: String,
    pub impr_id: String,
    pub user_id: String,
    pub ts: EventTime,
}

impl From<&ProducedImpression> for ImpressionEvent {
    fn from(p: &ProducedImpression) -> Self {
        ImpressionEvent::new(p.impr_id.clone(), p.campaign_id.clone(), p.ts)
    }
}

impl From<&ProducedClick> for ClickEvent {
    fn from(p: &ProducedClick) -> Self {
        ClickEvent::new(p.click_id.clone(), p.impr_id.clone(), p.ts)
    }
}

/// Both streams of a generated run, each sorted by event time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedStreams {
    pub impressions: Vec<ProducedImpression>,
    pub clicks: Vec<ProducedClick>,
}

impl GeneratedStreams {
    pub fn to_source(&self) -> MemorySource {
        MemorySource::from_streams(
            self.impressions.iter().map(ImpressionEvent::from).collect(),
            self.clicks.iter().map(ClickEvent::from).collect(),
        )
    }

    /// Write the streams as JSON lines using the producer's field names,
    /// which are the default [`SchemaConfig`].
    pub fn write_json_lines(&self, impressions: &Path, clicks: &Path) -> Result<()> {
        write_lines(impressions, &self.impressions)?;
        write_lines(clicks, &self.clicks)
    }
}

fn write_lines<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Synthetic impression/click producer.
///
/// Impressions are spaced evenly at the configured rate and assigned a random
/// campaign; each one draws a click with `click_probability`, delayed by a
/// random whole number of seconds. Output is fully determined by the seed.
pub struct SyntheticGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl SyntheticGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        if config.impressions_per_second == 0 {
            bail!("impressions_per_second must be > 0");
        }
        if !(0.0..=1.0).contains(&config.click_probability) {
            bail!(
                "click_probability must be within [0, 1], got {}",
                config.click_probability
            );
        }
        if config.campaigns.is_empty() {
            bail!("at least one campaign is required");
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self { config, rng })
    }

    /// Produce `duration` worth of impressions and their clicks.
    pub fn generate(&mut self, duration: Duration) -> GeneratedStreams {
        let step_ms = (1000 / self.config.impressions_per_second).max(1) as i64;
        let span_ms = duration.as_millis() as i64;
        let max_delay_secs = self.config.max_click_delay.as_secs();

        let mut streams = GeneratedStreams::default();
        let mut offset = 0;
        while offset < span_ms {
            let impression = ProducedImpression {
                impr_id: random_id(&mut self.rng, "impr", 8),
                user_id: random_id(&mut self.rng, "user", 6),
                campaign_id: self.config.campaigns
                    [self.rng.gen_range(0..self.config.campaigns.len())]
                .clone(),
                ts: self.config.start_time + offset,
            };
            if self.rng.gen_bool(self.config.click_probability) {
                let delay_ms = self.rng.gen_range(0..=max_delay_secs) as i64 * 1000;
                streams.clicks.push(ProducedClick {
                    click_id: random_id(&mut self.rng, "click", 8),
                    impr_id: impression.impr_id.clone(),
                    user_id: impression.user_id.clone(),
                    ts: impression.ts + delay_ms,
                });
            }
            streams.impressions.push(impression);
            offset += step_ms;
        }
        // Stable sort keeps same-millisecond clicks in impression order.
        streams.clicks.sort_by_key(|c| c.ts);
        debug!(
            impressions = streams.impressions.len(),
            clicks = streams.clicks.len(),
            "generated synthetic streams"
        );
        streams
    }
}

fn random_id(rng: &mut StdRng, prefix: &str, len: usize) -> String {
    let suffix: String = rng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    format!("{prefix}-{suffix}")
}

//! Synthetic CTR run.
//!
//! Generates two minutes of impressions and clicks, runs them through a job
//! with two join and two aggregate tasks, and prints every window.
//!
//! ```text
//! Source (parallelism=1)
//!     | by impression id
//!     v
//! Interval join (parallelism=2)
//!     | by campaign id
//!     v
//! Window aggregate (parallelism=2)
//!     |
//!     v
//! Memory sink
//! ```

use std::time::Duration;

use anyhow::Result;
use ctrflow_core::sink::{campaign_totals, MemorySink};
use ctrflow_core::source::{GeneratorConfig, SyntheticGenerator};
use ctrflow_core::{JobBuilder, PipelineConfig};

fn main() -> Result<()> {
    println!("=== Synthetic CTR ===\n");

    let streams = SyntheticGenerator::new(GeneratorConfig::default())?
        .generate(Duration::from_secs(120));
    println!(
        "Generated {} impressions and {} clicks\n",
        streams.impressions.len(),
        streams.clicks.len()
    );

    let config = PipelineConfig {
        parallelism: 2,
        checkpoint_interval: Duration::from_millis(100),
        ..PipelineConfig::default()
    };
    let sink = MemorySink::new();
    let summary = JobBuilder::new(config)
        .source(streams.to_source())
        .sink(sink.clone())
        .build()?
        .start()?
        .run_to_completion()?;

    let records = sink.records();
    println!("Windows:");
    for record in &records {
        println!(
            "  {} [{}, {}) impressions={} clicks={} ctr={:.3}",
            record.campaign_id,
            record.window_start,
            record.window_end,
            record.impressions,
            record.clicks,
            record.ctr
        );
    }

    println!("\nPer campaign:");
    for (campaign_id, totals) in campaign_totals(&records) {
        println!(
            "  {campaign_id}: {} windows, ctr={:.3}",
            totals.windows,
            totals.ctr()
        );
    }

    println!("\n{summary}");
    Ok(())
}

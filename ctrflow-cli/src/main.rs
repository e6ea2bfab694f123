use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ctrflow_core::sink::{campaign_totals, format_timestamp, read_csv_directory};
use ctrflow_core::source::{GeneratorConfig, SyntheticGenerator};
use ctrflow_core::{JobBuilder, JobConfig, JobSummary, RunOutcome};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ctrflow")]
#[command(about = "Streaming click-through-rate job", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the job until input is exhausted or ctrl-c.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        impressions: Option<PathBuf>,
        #[arg(long)]
        clicks: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        #[arg(long)]
        parallelism: Option<usize>,
        /// Fail unless a checkpoint can be restored.
        #[arg(long)]
        recover: bool,
    },
    /// Write synthetic impression and click streams as JSON lines.
    Generate {
        #[arg(long)]
        impressions: PathBuf,
        #[arg(long)]
        clicks: PathBuf,
        #[arg(long, default_value_t = 120)]
        seconds: u64,
        #[arg(long, default_value_t = 5)]
        rate: u32,
        #[arg(long, default_value_t = 0.25)]
        click_probability: f64,
        #[arg(long, default_value_t = 10)]
        max_click_delay_secs: u64,
        #[arg(long, value_delimiter = ',')]
        campaigns: Vec<String>,
        /// Event time of the first impression in epoch millis. Defaults to now.
        #[arg(long)]
        start_time: Option<i64>,
        #[arg(long, default_value_t = 0xC7F1)]
        seed: u64,
    },
    /// Print the records of a CSV sink directory and per-campaign totals.
    Results {
        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            impressions,
            clicks,
            output,
            checkpoint_dir,
            parallelism,
            recover,
        } => {
            let mut job_config = match config {
                Some(path) => JobConfig::load(&path)?,
                None => JobConfig::default(),
            };
            if impressions.is_some() {
                job_config.source.impressions = impressions;
            }
            if clicks.is_some() {
                job_config.source.clicks = clicks;
            }
            if output.is_some() {
                job_config.sink.output_dir = output;
            }
            if checkpoint_dir.is_some() {
                job_config.checkpoint.dir = checkpoint_dir;
            }
            if let Some(parallelism) = parallelism {
                job_config.pipeline.parallelism = parallelism;
            }
            let summary = run_job(job_config, recover).await?;
            println!("{summary}");
        }
        Commands::Generate {
            impressions,
            clicks,
            seconds,
            rate,
            click_probability,
            max_click_delay_secs,
            campaigns,
            start_time,
            seed,
        } => {
            let mut config = GeneratorConfig {
                impressions_per_second: rate,
                click_probability,
                max_click_delay: Duration::from_secs(max_click_delay_secs),
                start_time: start_time.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                seed,
                ..GeneratorConfig::default()
            };
            if !campaigns.is_empty() {
                config.campaigns = campaigns;
            }
            let streams = SyntheticGenerator::new(config)?.generate(Duration::from_secs(seconds));
            streams.write_json_lines(&impressions, &clicks)?;
            println!(
                "wrote {} impressions to {} and {} clicks to {}",
                streams.impressions.len(),
                impressions.display(),
                streams.clicks.len(),
                clicks.display()
            );
        }
        Commands::Results { output } => {
            let records = read_csv_directory(&output)?;
            if records.is_empty() {
                println!("no results under {}", output.display());
                return Ok(());
            }
            for record in &records {
                println!(
                    "{} [{} .. {}) impressions={} clicks={} ctr={:.4}",
                    record.campaign_id,
                    format_timestamp(record.window_start)?,
                    format_timestamp(record.window_end)?,
                    record.impressions,
                    record.clicks,
                    record.ctr
                );
            }
            println!();
            for (campaign_id, totals) in campaign_totals(&records) {
                println!(
                    "{campaign_id}: windows={} impressions={} clicks={} ctr={:.4}",
                    totals.windows,
                    totals.impressions,
                    totals.clicks,
                    totals.ctr()
                );
            }
        }
    }

    Ok(())
}

/// Run the job on a blocking thread. Ctrl-c raises the stop flag, which
/// cancels the job with a final checkpoint instead of flushing open windows.
async fn run_job(config: JobConfig, recover: bool) -> anyhow::Result<JobSummary> {
    let stop = Arc::new(AtomicBool::new(false));

    let signal = tokio::spawn({
        let stop = Arc::clone(&stop);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling job");
                stop.store(true, Ordering::Relaxed);
            }
        }
    });

    let worker = tokio::task::spawn_blocking({
        let stop = Arc::clone(&stop);
        move || {
            let job = JobBuilder::from_job_config(&config)?
                .require_checkpoint(recover)
                .build()?;
            if let Some(checkpoint_id) = job.restored_checkpoint() {
                info!(checkpoint_id, position = %job.start_position(), "resuming job");
            }
            let mut running = job.start()?;
            match running.run(&stop)? {
                RunOutcome::Exhausted => running.finish(),
                RunOutcome::Stopped => running.cancel(),
            }
        }
    });

    let result = worker.await;
    signal.abort();
    result?
}

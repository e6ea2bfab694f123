use super::*;

use chrono::{DateTime, NaiveDateTime};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PARTITION_PREFIX: &str = "campaign_id=";
const PART_PREFIX: &str = "part-";

/// Sink writing one header-less CSV part file per window.
///
/// Layout: `<dir>/campaign_id=<campaign>/part-<window_start_ms>`, each file
/// holding the single row `window_start,window_end,impressions,clicks,ctr`
/// with UTC timestamps. Files are written to a temporary name and renamed
/// into place, so a re-emitted window replaces its file atomically.
pub struct CsvDirectorySink {
    dir: PathBuf,
}

impl CsvDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn part_path(&self, record: &CtrRecord) -> PathBuf {
        self.dir
            .join(format!(
                "{PARTITION_PREFIX}{}",
                escape_partition_value(&record.campaign_id)
            ))
            .join(format!("{PART_PREFIX}{}", record.window_start))
    }
}

impl RecordSink for CsvDirectorySink {
    fn write(&mut self, record: &CtrRecord) -> Result<()> {
        let path = self.part_path(record);
        if let Some(partition) = path.parent() {
            fs::create_dir_all(partition)
                .with_context(|| format!("failed to create {}", partition.display()))?;
        }
        let row = format!(
            "{},{},{},{},{}\n",
            format_timestamp(record.window_start)?,
            format_timestamp(record.window_end)?,
            record.impressions,
            record.clicks,
            record.ctr
        );
        let tmp = path.with_extension("inprogress");
        fs::write(&tmp, row).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to commit {}", path.display()))?;
        debug!(path = %path.display(), "wrote part file");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // Every write is committed by its rename.
        Ok(())
    }
}

/// Read every committed part file under `dir`, in key order.
///
/// In-progress files are ignored.
pub fn read_csv_directory(dir: impl AsRef<Path>) -> Result<Vec<CtrRecord>> {
    let dir = dir.as_ref();
    let mut records = Vec::new();
    for partition in
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let partition = partition?;
        let name = partition.file_name();
        let Some(campaign) = name.to_str().and_then(|n| n.strip_prefix(PARTITION_PREFIX)) else {
            continue;
        };
        if !partition.file_type()?.is_dir() {
            continue;
        }
        let campaign_id = unescape_partition_value(campaign)?;
        for part in fs::read_dir(partition.path())? {
            let part = part?;
            let part_name = part.file_name();
            let Some(part_name) = part_name.to_str() else {
                continue;
            };
            if !part_name.starts_with(PART_PREFIX) || part_name.contains('.') {
                continue;
            }
            let content = fs::read_to_string(part.path())
                .with_context(|| format!("failed to read {}", part.path().display()))?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let record = parse_row(&campaign_id, line)
                    .with_context(|| format!("bad row in {}", part.path().display()))?;
                records.push(record);
            }
        }
    }
    records.sort_by_key(CtrRecord::key);
    Ok(records)
}

/// Per-campaign totals over a set of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignTotals {
    pub windows: u64,
    pub impressions: i64,
    pub clicks: i64,
}

impl CampaignTotals {
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        }
    }
}

pub fn campaign_totals(records: &[CtrRecord]) -> BTreeMap<String, CampaignTotals> {
    let mut totals: BTreeMap<String, CampaignTotals> = BTreeMap::new();
    for record in records {
        let entry = totals.entry(record.campaign_id.clone()).or_default();
        entry.windows += 1;
        entry.impressions += record.impressions;
        entry.clicks += record.clicks;
    }
    totals
}

pub fn format_timestamp(ms: EventTime) -> Result<String> {
    if ms.rem_euclid(1_000) != 0 {
        bail!("timestamp {ms} is not a whole second");
    }
    let ts = DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| anyhow!("timestamp {ms} is out of range"))?;
    Ok(ts.format(TIMESTAMP_FORMAT).to_string())
}

pub fn parse_timestamp(text: &str) -> Result<EventTime> {
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .with_context(|| format!("invalid timestamp `{text}`"))?;
    Ok(naive.and_utc().timestamp_millis())
}

fn parse_row(campaign_id: &str, line: &str) -> Result<CtrRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [start, end, impressions, clicks, ctr] = fields.as_slice() else {
        bail!("expected 5 columns, got {}", fields.len());
    };
    Ok(CtrRecord {
        campaign_id: campaign_id.to_string(),
        window_start: parse_timestamp(start)?,
        window_end: parse_timestamp(end)?,
        impressions: impressions.parse().context("invalid impressions")?,
        clicks: clicks.parse().context("invalid clicks")?,
        ctr: ctr.parse().context("invalid ctr")?,
    })
}

/// Percent-escape the characters that cannot appear in a directory name.
fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' | '/' | '\\' | '=' | '.' | ':' | '\0' => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn unescape_partition_value(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let hex: String = chars.by_ref().take(2).collect();
        let code = u8::from_str_radix(&hex, 16)
            .with_context(|| format!("invalid escape `%{hex}` in partition `{value}`"))?;
        out.push(char::from(code));
    }
    Ok(out)
}

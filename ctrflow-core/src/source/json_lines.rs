use super::*;

use serde_json::{Map, Value};

/// One newline-delimited JSON file being read.
struct LineStream {
    stream: InputStream,
    path: PathBuf,
    /// `None` once the file is exhausted.
    lines: Option<Lines<BufReader<File>>>,
    lines_read: u64,
    /// Next decoded event and the line count up to and including it.
    head: Option<(InputEvent, u64)>,
}

impl LineStream {
    fn open(stream: InputStream, path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open {} input {}", stream, path.display()))?;
        Ok(Self {
            stream,
            path: path.to_path_buf(),
            lines: Some(BufReader::new(file).lines()),
            lines_read: 0,
            head: None,
        })
    }

    fn skip_lines(&mut self, count: u64) -> Result<()> {
        while self.lines_read < count {
            match self.lines.as_mut().and_then(Iterator::next) {
                Some(line) => {
                    line.with_context(|| format!("failed to read {}", self.path.display()))?;
                    self.lines_read += 1;
                }
                None => bail!(
                    "{} has {} lines, cannot seek to line {}",
                    self.path.display(),
                    self.lines_read,
                    count
                ),
            }
        }
        Ok(())
    }

    fn fill_head(&mut self, schema: &SchemaConfig, malformed: &mut u64) -> Result<()> {
        while self.head.is_none() {
            let Some(lines) = self.lines.as_mut() else {
                return Ok(());
            };
            let Some(line) = lines.next() else {
                debug!(stream = %self.stream, lines = self.lines_read, "input exhausted");
                self.lines = None;
                return Ok(());
            };
            let line = line.with_context(|| format!("failed to read {}", self.path.display()))?;
            self.lines_read += 1;
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(self.stream, &line, schema) {
                Ok(event) => self.head = Some((event, self.lines_read)),
                Err(err) => {
                    *malformed += 1;
                    warn!(
                        stream = %self.stream,
                        line = self.lines_read,
                        error = %err,
                        "skipping malformed record"
                    );
                }
            }
        }
        Ok(())
    }

    fn head_time(&self) -> Option<EventTime> {
        self.head.as_ref().map(|(event, _)| event.event_time())
    }
}

/// Source reading one JSON-lines file per stream.
///
/// Field names come from [`SchemaConfig`]. Each file is read in its own
/// order; the two are merged by event time, with ties going to the
/// impression. Lines that are not a JSON object with the configured fields
/// are skipped and counted. Positions are line counts, so malformed lines
/// before a checkpoint are not re-emitted after a seek.
pub struct JsonLinesSource {
    schema: SchemaConfig,
    impressions: LineStream,
    clicks: LineStream,
    position: SourcePosition,
    malformed: u64,
}

impl JsonLinesSource {
    pub fn open(
        impressions: impl AsRef<Path>,
        clicks: impl AsRef<Path>,
        schema: SchemaConfig,
    ) -> Result<Self> {
        Ok(Self {
            schema,
            impressions: LineStream::open(InputStream::Impressions, impressions.as_ref())?,
            clicks: LineStream::open(InputStream::Clicks, clicks.as_ref())?,
            position: SourcePosition::default(),
            malformed: 0,
        })
    }
}

impl EventSource for JsonLinesSource {
    fn poll(&mut self) -> Result<SourcePoll> {
        self.impressions.fill_head(&self.schema, &mut self.malformed)?;
        self.clicks.fill_head(&self.schema, &mut self.malformed)?;

        let from = match (self.impressions.head_time(), self.clicks.head_time()) {
            (Some(imp), Some(click)) if imp <= click => &mut self.impressions,
            (Some(_), Some(_)) => &mut self.clicks,
            (Some(_), None) => &mut self.impressions,
            (None, Some(_)) => &mut self.clicks,
            (None, None) => return Ok(SourcePoll::Exhausted),
        };
        let Some((event, line)) = from.head.take() else {
            return Err(anyhow!("{} input lost its buffered record", from.stream));
        };
        match from.stream {
            InputStream::Impressions => self.position.impressions = line,
            InputStream::Clicks => self.position.clicks = line,
        }
        Ok(SourcePoll::Event(event))
    }

    fn position(&self) -> SourcePosition {
        self.position
    }

    fn seek(&mut self, position: SourcePosition) -> Result<()> {
        let mut impressions = LineStream::open(InputStream::Impressions, &self.impressions.path)?;
        let mut clicks = LineStream::open(InputStream::Clicks, &self.clicks.path)?;
        impressions.skip_lines(position.impressions)?;
        clicks.skip_lines(position.clicks)?;
        self.impressions = impressions;
        self.clicks = clicks;
        self.position = position;
        debug!(%position, "seeked json-lines source");
        Ok(())
    }

    fn malformed_records(&self) -> u64 {
        self.malformed
    }
}

fn decode_line(stream: InputStream, line: &str, schema: &SchemaConfig) -> Result<InputEvent> {
    let value: Value = serde_json::from_str(line).context("invalid JSON")?;
    let Value::Object(obj) = value else {
        bail!("record is not a JSON object");
    };
    let event = match stream {
        InputStream::Impressions => InputEvent::impression(
            id_field(&obj, &schema.impression_id)?,
            id_field(&obj, &schema.campaign_id)?,
            time_field(&obj, &schema.impression_time)?,
        ),
        InputStream::Clicks => InputEvent::click(
            id_field(&obj, &schema.click_id)?,
            id_field(&obj, &schema.click_impression_id)?,
            time_field(&obj, &schema.click_time)?,
        ),
    };
    Ok(event)
}

fn id_field(obj: &Map<String, Value>, name: &str) -> Result<String> {
    match obj.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => bail!("field `{name}` has unexpected value {other}"),
        None => bail!("missing field `{name}`"),
    }
}

fn time_field(obj: &Map<String, Value>, name: &str) -> Result<EventTime> {
    match obj.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| anyhow!("field `{name}` is not an integer timestamp: {n}")),
        Some(other) => bail!("field `{name}` has unexpected value {other}"),
        None => bail!("missing field `{name}`"),
    }
}

use super::*;
use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "ctrflow-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn drain(source: &mut dyn EventSource) -> Vec<InputEvent> {
    let mut events = Vec::new();
    loop {
        match source.poll().unwrap() {
            SourcePoll::Event(event) => events.push(event),
            SourcePoll::Pending => continue,
            SourcePoll::Exhausted => return events,
        }
    }
}

// --- memory source ---

#[test]
fn test_memory_source_replays_in_order() {
    let events = vec![
        InputEvent::click("clk2", "imp2", 42_000),
        InputEvent::impression("imp2", "c1", 29_000),
    ];
    let mut source = MemorySource::new(events.clone());
    assert_eq!(drain(&mut source), events);
    assert_eq!(
        source.position(),
        SourcePosition {
            impressions: 1,
            clicks: 1
        }
    );
    assert_eq!(source.poll().unwrap(), SourcePoll::Exhausted);
}

#[test]
fn test_memory_source_merges_streams_by_time() {
    let source = MemorySource::from_streams(
        vec![
            ImpressionEvent::new("a", "c1", 1_000),
            ImpressionEvent::new("b", "c1", 5_000),
        ],
        vec![
            ClickEvent::new("x", "a", 1_000),
            ClickEvent::new("y", "b", 3_000),
        ],
    );
    let mut source = source;
    let order: Vec<EventTime> = drain(&mut source).iter().map(InputEvent::event_time).collect();
    assert_eq!(order, vec![1_000, 1_000, 3_000, 5_000]);
}

#[test]
fn test_memory_source_seek() {
    let events = vec![
        InputEvent::impression("a", "c1", 1_000),
        InputEvent::click("x", "a", 2_000),
        InputEvent::impression("b", "c1", 3_000),
        InputEvent::click("y", "b", 4_000),
    ];
    let mut source = MemorySource::new(events.clone());
    drain(&mut source);

    source
        .seek(SourcePosition {
            impressions: 1,
            clicks: 1,
        })
        .unwrap();
    assert_eq!(drain(&mut source), events[2..].to_vec());

    // Two impressions never form a prefix of this list.
    assert!(source
        .seek(SourcePosition {
            impressions: 2,
            clicks: 0
        })
        .is_err());
    assert!(source
        .seek(SourcePosition {
            impressions: 5,
            clicks: 5
        })
        .is_err());
}

// --- json lines ---

fn write(path: &Path, lines: &[&str]) {
    fs::write(path, lines.join("\n") + "\n").unwrap();
}

#[test]
fn test_json_lines_source_reads_and_merges() {
    let dir = unique_temp_dir("jsonl-merge");
    let imps = dir.join("impressions.jsonl");
    let clicks = dir.join("clicks.jsonl");
    write(
        &imps,
        &[
            r#"{"impr_id":"imp1","user_id":"u1","campaign_id":"c1","ts":5000}"#,
            r#"{"impr_id":"imp2","user_id":"u2","campaign_id":"c1","ts":29000}"#,
        ],
    );
    write(
        &clicks,
        &[
            r#"{"click_id":"clk1","impr_id":"imp1","user_id":"u1","ts":10000}"#,
            r#"{"click_id":"clk2","impr_id":"imp2","user_id":"u2","ts":42000}"#,
        ],
    );

    let mut source = JsonLinesSource::open(&imps, &clicks, SchemaConfig::default()).unwrap();
    assert_eq!(
        drain(&mut source),
        vec![
            InputEvent::impression("imp1", "c1", 5_000),
            InputEvent::click("clk1", "imp1", 10_000),
            InputEvent::impression("imp2", "c1", 29_000),
            InputEvent::click("clk2", "imp2", 42_000),
        ]
    );
    assert_eq!(source.malformed_records(), 0);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_json_lines_source_skips_malformed_lines() {
    let dir = unique_temp_dir("jsonl-malformed");
    let imps = dir.join("impressions.jsonl");
    let clicks = dir.join("clicks.jsonl");
    write(
        &imps,
        &[
            r#"{"impr_id":"imp1","campaign_id":"c1","ts":5000}"#,
            "not json",
            r#"{"impr_id":"imp2","ts":6000}"#,
            "",
            r#"{"impr_id":"imp3","campaign_id":"c2","ts":"soon"}"#,
            r#"["impr_id"]"#,
            r#"{"impr_id":"imp4","campaign_id":"c2","ts":7000}"#,
        ],
    );
    write(&clicks, &[]);

    let mut source = JsonLinesSource::open(&imps, &clicks, SchemaConfig::default()).unwrap();
    let ids: Vec<String> = drain(&mut source)
        .iter()
        .map(|e| e.impression_id().to_string())
        .collect();
    assert_eq!(ids, vec!["imp1", "imp4"]);
    assert_eq!(source.malformed_records(), 4);
    assert_eq!(source.position().impressions, 7);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_json_lines_source_custom_schema() {
    let dir = unique_temp_dir("jsonl-schema");
    let imps = dir.join("i.jsonl");
    let clicks = dir.join("c.jsonl");
    write(&imps, &[r#"{"id":17,"campaign":"c9","event_ts":1000}"#]);
    write(&clicks, &[r#"{"cid":"k1","ref":17,"event_ts":1500}"#]);

    let schema = SchemaConfig {
        impression_id: "id".into(),
        campaign_id: "campaign".into(),
        impression_time: "event_ts".into(),
        click_id: "cid".into(),
        click_impression_id: "ref".into(),
        click_time: "event_ts".into(),
    };
    let mut source = JsonLinesSource::open(&imps, &clicks, schema).unwrap();
    assert_eq!(
        drain(&mut source),
        vec![
            InputEvent::impression("17", "c9", 1_000),
            InputEvent::click("k1", "17", 1_500),
        ]
    );
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_json_lines_source_seek_replays_after_position() {
    let dir = unique_temp_dir("jsonl-seek");
    let imps = dir.join("impressions.jsonl");
    let clicks = dir.join("clicks.jsonl");
    write(
        &imps,
        &[
            r#"{"impr_id":"a","campaign_id":"c1","ts":1000}"#,
            r#"{"impr_id":"b","campaign_id":"c1","ts":3000}"#,
        ],
    );
    write(
        &clicks,
        &[
            r#"{"click_id":"x","impr_id":"a","ts":2000}"#,
            r#"{"click_id":"y","impr_id":"b","ts":4000}"#,
        ],
    );

    let mut source = JsonLinesSource::open(&imps, &clicks, SchemaConfig::default()).unwrap();
    source.poll().unwrap();
    source.poll().unwrap();
    let position = source.position();
    assert_eq!(
        position,
        SourcePosition {
            impressions: 1,
            clicks: 1
        }
    );
    let rest = drain(&mut source);

    let mut resumed = JsonLinesSource::open(&imps, &clicks, SchemaConfig::default()).unwrap();
    resumed.seek(position).unwrap();
    assert_eq!(drain(&mut resumed), rest);

    assert!(resumed
        .seek(SourcePosition {
            impressions: 10,
            clicks: 0
        })
        .is_err());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_json_lines_source_missing_file() {
    let dir = unique_temp_dir("jsonl-missing");
    let err = JsonLinesSource::open(
        dir.join("nope.jsonl"),
        dir.join("nope2.jsonl"),
        SchemaConfig::default(),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("failed to open impressions input"));
    fs::remove_dir_all(&dir).unwrap();
}

// --- generator ---

fn small_config(seed: u64) -> GeneratorConfig {
    GeneratorConfig {
        impressions_per_second: 10,
        click_probability: 0.5,
        start_time: 1_700_000_000_000,
        seed,
        ..GeneratorConfig::default()
    }
}

#[test]
fn test_generator_shapes_streams() {
    let mut generator = SyntheticGenerator::new(small_config(7)).unwrap();
    let streams = generator.generate(Duration::from_secs(20));

    assert_eq!(streams.impressions.len(), 200);
    assert!(!streams.clicks.is_empty());
    assert!(streams.clicks.windows(2).all(|w| w[0].ts <= w[1].ts));

    let config = GeneratorConfig::default();
    for imp in &streams.impressions {
        assert!(imp.impr_id.starts_with("impr-") && imp.impr_id.len() == 13);
        assert!(config.campaigns.contains(&imp.campaign_id));
    }
    for click in &streams.clicks {
        let imp = streams
            .impressions
            .iter()
            .find(|i| i.impr_id == click.impr_id)
            .unwrap();
        let delay = click.ts - imp.ts;
        assert!((0..=10_000).contains(&delay) && delay % 1000 == 0);
        assert_eq!(click.user_id, imp.user_id);
    }
}

#[test]
fn test_generator_is_deterministic_per_seed() {
    let a = SyntheticGenerator::new(small_config(1))
        .unwrap()
        .generate(Duration::from_secs(5));
    let b = SyntheticGenerator::new(small_config(1))
        .unwrap()
        .generate(Duration::from_secs(5));
    let c = SyntheticGenerator::new(small_config(2))
        .unwrap()
        .generate(Duration::from_secs(5));
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_generator_rejects_bad_config() {
    assert!(SyntheticGenerator::new(GeneratorConfig {
        impressions_per_second: 0,
        ..GeneratorConfig::default()
    })
    .is_err());
    assert!(SyntheticGenerator::new(GeneratorConfig {
        click_probability: 1.5,
        ..GeneratorConfig::default()
    })
    .is_err());
    assert!(SyntheticGenerator::new(GeneratorConfig {
        campaigns: Vec::new(),
        ..GeneratorConfig::default()
    })
    .is_err());
}

#[test]
fn test_generated_files_read_back_through_json_source() {
    let dir = unique_temp_dir("generator-files");
    let imps = dir.join("in/impressions.jsonl");
    let clicks = dir.join("in/clicks.jsonl");
    let streams = SyntheticGenerator::new(small_config(3))
        .unwrap()
        .generate(Duration::from_secs(10));
    streams.write_json_lines(&imps, &clicks).unwrap();

    let mut from_files = JsonLinesSource::open(&imps, &clicks, SchemaConfig::default()).unwrap();
    let mut from_memory = streams.to_source();
    assert_eq!(drain(&mut from_files), drain(&mut from_memory));
    assert_eq!(from_files.malformed_records(), 0);
    fs::remove_dir_all(&dir).unwrap();
}

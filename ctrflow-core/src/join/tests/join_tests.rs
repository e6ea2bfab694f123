use super::*;

const BOUND: i64 = 15_000;

fn imp(id: &str, campaign: &str, ts: EventTime) -> InputEvent {
    InputEvent::impression(id, campaign, ts)
}

fn click(id: &str, impression_id: &str, ts: EventTime) -> InputEvent {
    InputEvent::click(id, impression_id, ts)
}

fn run(join: &mut IntervalJoin, events: Vec<InputEvent>) -> Vec<JoinOutput> {
    let mut out = Vec::new();
    for event in events {
        join.process(event, &mut out);
    }
    out
}

fn pairs(out: &[JoinOutput]) -> Vec<(String, String, EventTime)> {
    out.iter()
        .filter_map(|o| match o {
            JoinOutput::Pair(p) => Some((p.impression_id.clone(), p.click_id.clone(), p.impression_time)),
            JoinOutput::Impression(_) => None,
        })
        .collect()
}

#[test]
fn test_click_after_impression_matches() {
    let mut join = IntervalJoin::new(BOUND);
    let out = run(
        &mut join,
        vec![imp("imp1", "c1", 5_000), click("clk1", "imp1", 10_000)],
    );
    assert_eq!(
        out,
        vec![JoinOutput::Pair(JoinedPair {
            impression_id: "imp1".into(),
            campaign_id: "c1".into(),
            impression_time: 5_000,
            click_id: "clk1".into(),
            click_time: 10_000,
        })]
    );
    assert_eq!(join.metrics().matches, 1);
    assert_eq!(join.num_pending_clicks(), 0);
}

#[test]
fn test_click_before_impression_matches_on_arrival() {
    let mut join = IntervalJoin::new(BOUND);
    let out = run(
        &mut join,
        vec![click("clk2", "imp2", 42_000), imp("imp2", "c1", 29_000)],
    );
    assert_eq!(pairs(&out), vec![("imp2".into(), "clk2".into(), 29_000)]);
    // Matched clicks leave the buffer together with their timer.
    assert_eq!(join.num_pending_clicks(), 0);
    assert_eq!(join.num_timers(), 1);
}

#[test]
fn test_bound_edges() {
    let cases = [
        (0, true),
        (BOUND, true),
        (BOUND + 1, false),
        (-1, false),
    ];
    for (delta, expect_match) in cases {
        // Arrival order must not matter.
        for click_first in [false, true] {
            let mut join = IntervalJoin::new(BOUND);
            let i = imp("imp", "c1", 100_000);
            let c = click("clk", "imp", 100_000 + delta);
            let events = if click_first { vec![c, i] } else { vec![i, c] };
            let out = run(&mut join, events);
            assert_eq!(
                !out.is_empty(),
                expect_match,
                "delta={delta} click_first={click_first}"
            );
        }
    }
}

#[test]
fn test_ids_must_match_exactly() {
    let mut join = IntervalJoin::new(BOUND);
    let out = run(
        &mut join,
        vec![imp("imp1", "c1", 5_000), click("clk1", "IMP1", 6_000)],
    );
    assert!(out.is_empty());
    assert_eq!(join.num_pending_clicks(), 1);
}

#[test]
fn test_one_impression_many_clicks() {
    let mut join = IntervalJoin::new(BOUND);
    let out = run(
        &mut join,
        vec![
            click("a", "imp1", 6_000),
            click("b", "imp1", 7_000),
            imp("imp1", "c1", 5_000),
            click("c", "imp1", 8_000),
        ],
    );
    assert_eq!(
        pairs(&out),
        vec![
            ("imp1".into(), "a".into(), 5_000),
            ("imp1".into(), "b".into(), 5_000),
            ("imp1".into(), "c".into(), 5_000),
        ]
    );
    assert_eq!(join.metrics().matches, 3);
}

#[test]
fn test_duplicates_are_idempotent() {
    let mut join = IntervalJoin::new(BOUND);
    let out = run(
        &mut join,
        vec![
            imp("imp1", "c1", 5_000),
            imp("imp1", "c1", 5_000),
            click("clk1", "imp1", 10_000),
            click("clk1", "imp1", 10_000),
            // Duplicate of a click that is still waiting for its impression.
            click("clk9", "imp9", 11_000),
            click("clk9", "imp9", 11_000),
        ],
    );
    assert_eq!(pairs(&out), vec![("imp1".into(), "clk1".into(), 5_000)]);
    assert_eq!(join.metrics().duplicate_impressions, 1);
    assert_eq!(join.metrics().duplicate_clicks, 2);
    assert_eq!(join.num_pending_clicks(), 1);
}

#[test]
fn test_impression_evicted_after_bound() {
    let mut join = IntervalJoin::new(BOUND);
    run(&mut join, vec![imp("imp3", "c1", 10_000)]);

    // watermark == impression_time + bound: a click at exactly the bound may still come.
    join.on_watermark(25_000);
    assert_eq!(join.num_pending_impressions(), 1);

    join.on_watermark(25_001);
    assert_eq!(join.num_pending_impressions(), 0);
    assert_eq!(join.metrics().expired_impressions, 1);
}

#[test]
fn test_matched_impression_eviction_is_not_counted() {
    let mut join = IntervalJoin::new(BOUND);
    run(
        &mut join,
        vec![imp("imp1", "c1", 5_000), click("clk1", "imp1", 10_000)],
    );
    join.on_watermark(60_000);
    assert_eq!(join.num_pending_impressions(), 0);
    assert_eq!(join.metrics().expired_impressions, 0);
}

#[test]
fn test_orphan_click_evicted() {
    let mut join = IntervalJoin::new(BOUND);
    run(&mut join, vec![click("clk3", "imp4", 50_000)]);

    join.on_watermark(50_000);
    assert_eq!(join.num_pending_clicks(), 1);

    join.on_watermark(50_001);
    assert_eq!(join.num_pending_clicks(), 0);
    assert_eq!(join.num_timers(), 0);
    assert_eq!(join.metrics().expired_clicks, 1);
}

#[test]
fn test_late_events_dropped() {
    let mut join = IntervalJoin::new(BOUND);
    join.on_watermark(20_000);
    let out = run(
        &mut join,
        vec![imp("imp1", "c1", 20_000), click("clk1", "imp1", 19_000)],
    );
    assert!(out.is_empty());
    assert_eq!(join.metrics().late_impressions, 1);
    assert_eq!(join.metrics().late_clicks, 1);
    assert_eq!(join.num_pending_impressions(), 0);
}

#[test]
fn test_forwarded_watermark_is_held_back_by_bound() {
    let mut join = IntervalJoin::new(BOUND);
    assert_eq!(join.on_watermark(40_000), Some(25_000));
    // No regression, no repeat.
    assert_eq!(join.on_watermark(39_000), None);
    assert_eq!(join.on_watermark(40_000), None);
    assert_eq!(join.on_watermark(41_000), Some(26_000));
    // The end-of-input watermark is forwarded unchanged.
    assert_eq!(join.on_watermark(EVENT_TIME_MAX), Some(EVENT_TIME_MAX));
}

#[test]
fn test_pairs_never_precede_forwarded_watermark() {
    let mut join = IntervalJoin::new(BOUND);
    let mut out = Vec::new();
    join.process(imp("imp2", "c1", 29_000), &mut out);
    let forwarded = join.on_watermark(37_000).unwrap();
    join.process(click("clk2", "imp2", 42_000), &mut out);

    let pair_times: Vec<_> = out.iter().map(JoinOutput::impression_time).collect();
    assert_eq!(pair_times, vec![29_000]);
    assert!(pair_times.iter().all(|t| *t > forwarded));
}

#[test]
fn test_forwarded_impressions_mode() {
    let mut join = IntervalJoin::new(BOUND).with_forwarded_impressions(true);
    let out = run(
        &mut join,
        vec![imp("imp1", "c1", 5_000), imp("imp3", "c1", 10_000)],
    );
    assert_eq!(
        out,
        vec![
            JoinOutput::Impression(ImpressionEvent::new("imp1", "c1", 5_000)),
            JoinOutput::Impression(ImpressionEvent::new("imp3", "c1", 10_000)),
        ]
    );
}

#[test]
fn test_snapshot_restore_resumes_matching() {
    let mut join = IntervalJoin::new(BOUND);
    run(
        &mut join,
        vec![imp("imp1", "c1", 5_000), click("clk7", "imp7", 9_000)],
    );
    join.on_watermark(6_000);
    let bytes = join.snapshot_state().unwrap();

    let mut restored = IntervalJoin::new(BOUND);
    restored.restore_state(&bytes).unwrap();
    assert_eq!(restored.current_watermark(), 6_000);
    assert_eq!(restored.num_pending_impressions(), 1);
    assert_eq!(restored.num_pending_clicks(), 1);

    let out = run(
        &mut restored,
        vec![click("clk1", "imp1", 10_000), imp("imp7", "c2", 8_000)],
    );
    assert_eq!(
        pairs(&out),
        vec![
            ("imp1".into(), "clk1".into(), 5_000),
            ("imp7".into(), "clk7".into(), 8_000),
        ]
    );
    assert_eq!(restored.on_watermark(6_000), None);
    assert_eq!(restored.on_watermark(21_000), Some(6_000));
}

#[test]
fn test_restore_rejects_garbage() {
    let mut join = IntervalJoin::new(BOUND);
    assert!(join.restore_state(&[1, 2, 3]).is_err());
}

use super::*;

#[test]
fn test_stream_element_record() {
    let elem = StreamElement::record(42i32);
    match elem {
        StreamElement::Record(value) => assert_eq!(value, 42),
        _ => panic!("expected Record"),
    }
}

#[test]
fn test_stream_element_watermark() {
    let elem = StreamElement::<i32>::watermark(1000);
    match elem {
        StreamElement::Watermark(wm) => assert_eq!(wm.timestamp, 1000),
        _ => panic!("expected Watermark"),
    }
}

#[test]
fn test_stream_element_barrier_with_timestamp() {
    let elem = StreamElement::<i32>::barrier_with_timestamp(7, 1234);
    match elem {
        StreamElement::CheckpointBarrier(b) => {
            assert_eq!(b.checkpoint_id, 7);
            assert_eq!(b.timestamp, 1234);
        }
        _ => panic!("expected Barrier"),
    }
}

#[test]
fn test_watermark_display() {
    assert_eq!(Watermark::new(42_000).to_string(), "Watermark(42000ms)");
}

#[test]
fn test_input_event_accessors() {
    let imp = InputEvent::impression("imp1", "c1", 5_000);
    assert_eq!(imp.stream(), InputStream::Impressions);
    assert_eq!(imp.event_time(), 5_000);
    assert_eq!(imp.impression_id(), "imp1");

    let click = InputEvent::click("clk1", "imp1", 10_000);
    assert_eq!(click.stream(), InputStream::Clicks);
    assert_eq!(click.event_time(), 10_000);
    // Clicks are keyed by the impression they reference, not their own id.
    assert_eq!(click.impression_id(), "imp1");
}

#[test]
fn test_ctr_record_from_counts() {
    let key = WindowKey::new("c1", 0, 30_000);
    let rec = CtrRecord::from_counts(&key, 4, 1);
    assert_eq!(rec.impressions, 4);
    assert_eq!(rec.clicks, 1);
    assert_eq!(rec.ctr, 0.25);
    assert_eq!(rec.key(), key);
}

#[test]
fn test_window_key_ordering_and_display() {
    let a = WindowKey::new("c1", 0, 30_000);
    let b = WindowKey::new("c1", 30_000, 60_000);
    let c = WindowKey::new("c2", 0, 30_000);
    assert!(a < b);
    assert!(b < c);
    assert_eq!(a.max_timestamp(), 29_999);
    assert_eq!(a.to_string(), "c1@[0, 30000)");
}

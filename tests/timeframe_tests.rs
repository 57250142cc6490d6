//! Timeframe parsing and aggregation integration tests

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use signal_service::timeframe::{
    aggregate_series, SeriesPoint, Timeframe, TimeframeKind, MAX_TIMEFRAME_MINUTES,
};

fn aligned_base() -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_790_000_100, 0).unwrap()
}

fn bar_point(offset_min: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> SeriesPoint {
    SeriesPoint::new(aligned_base() + chrono::Duration::minutes(offset_min))
        .with_field("open", open)
        .with_field("high", high)
        .with_field("low", low)
        .with_field("close", close)
        .with_field("volume", volume)
}

#[test]
fn test_boundary_minutes() {
    assert!(Timeframe::parse("1m").is_ok());
    assert!(Timeframe::parse("1440m").is_ok());
    assert!(Timeframe::parse("0m").is_err());
    assert!(Timeframe::parse("1441m").is_err());
    assert!(Timeframe::custom(1).is_ok());
    assert!(Timeframe::custom(MAX_TIMEFRAME_MINUTES).is_ok());
    assert!(Timeframe::custom(0).is_err());
    assert!(Timeframe::custom(1441).is_err());
}

#[test]
fn test_custom_timeframe_aggregation_scenario() {
    // Base closes [100, 101, 99, 100, 102] at 1-minute spacing, tf=5m.
    let closes = [100.0, 101.0, 99.0, 100.0, 102.0];
    let points: Vec<SeriesPoint> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| bar_point(i as i64, *c, *c, *c, *c, 10.0))
        .collect();

    let now = aligned_base() + chrono::Duration::minutes(10);
    let out = aggregate_series(&points, 5, None, now);

    assert_eq!(out.len(), 1, "one closed 5m bucket expected");
    let bucket = &out[0];
    assert_eq!(bucket.field("open"), Some(100.0));
    assert_eq!(bucket.field("close"), Some(102.0));
    assert_eq!(bucket.field("high"), Some(102.0));
    assert_eq!(bucket.field("low"), Some(99.0));
    assert_eq!(bucket.field("volume"), Some(50.0), "volume sums over the bucket");
}

#[test]
fn test_bucket_alignment_is_left_closed_on_utc() {
    // Two observations either side of a 15m boundary land in two buckets.
    let points = vec![
        bar_point(14, 100.0, 100.0, 100.0, 100.0, 1.0),
        bar_point(15, 200.0, 200.0, 200.0, 200.0, 1.0),
    ];
    let now = aligned_base() + chrono::Duration::minutes(40);
    let out = aggregate_series(&points, 15, None, now);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].timestamp, aligned_base());
    assert_eq!(out[1].timestamp, aligned_base() + chrono::Duration::minutes(15));
    assert_eq!(out[0].field("close"), Some(100.0));
    assert_eq!(out[1].field("open"), Some(200.0));
}

#[test]
fn test_unordered_input_aggregates_deterministically() {
    let ordered: Vec<SeriesPoint> = (0..5)
        .map(|i| bar_point(i, 100.0 + i as f64, 101.0 + i as f64, 99.0, 100.5 + i as f64, 5.0))
        .collect();
    let mut shuffled = ordered.clone();
    shuffled.reverse();

    let now = aligned_base() + chrono::Duration::minutes(10);
    assert_eq!(
        aggregate_series(&ordered, 5, None, now),
        aggregate_series(&shuffled, 5, None, now),
        "open/close are strictly time-ordered regardless of input order"
    );
}

proptest! {
    #[test]
    fn prop_parse_format_round_trip(minutes in 1u32..=1440) {
        let tf = Timeframe::custom(minutes).unwrap();
        let reparsed = Timeframe::parse(&tf.to_string()).unwrap();
        prop_assert_eq!(reparsed.minutes(), minutes);
    }

    #[test]
    fn prop_standard_tags_round_trip(idx in 0usize..7) {
        let (tag, minutes) = signal_service::timeframe::STANDARD_TIMEFRAMES[idx];
        let tf = Timeframe::parse(tag).unwrap();
        prop_assert_eq!(tf.kind(), TimeframeKind::Standard);
        prop_assert_eq!(tf.minutes(), minutes);
        prop_assert_eq!(tf.to_string(), tag);
    }

    #[test]
    fn prop_out_of_range_minutes_rejected(minutes in 1441u32..100_000) {
        let minutes_tag = format!("{}m", minutes);
        let custom_tag = format!("custom_{}", minutes);
        prop_assert!(Timeframe::parse(&minutes_tag).is_err());
        prop_assert!(Timeframe::parse(&custom_tag).is_err());
    }

    #[test]
    fn prop_sum_reducer_commutes_with_composition(
        volumes in proptest::collection::vec(0.0f64..1_000.0, 30)
    ) {
        let points: Vec<SeriesPoint> = volumes
            .iter()
            .enumerate()
            .map(|(i, v)| {
                SeriesPoint::new(aligned_base() + chrono::Duration::minutes(i as i64))
                    .with_field("volume", *v)
                    .with_field("high", *v)
                    .with_field("low", -*v)
            })
            .collect();
        let now = aligned_base() + chrono::Duration::minutes(60);

        let direct = aggregate_series(&points, 30, None, now);
        let tens = aggregate_series(&points, 10, None, now);
        let composed = aggregate_series(&tens, 30, None, now);

        prop_assert_eq!(direct.len(), composed.len());
        for (d, c) in direct.iter().zip(composed.iter()) {
            let dv = d.field("volume").unwrap();
            let cv = c.field("volume").unwrap();
            prop_assert!((dv - cv).abs() < 1e-9, "sum should commute: {} vs {}", dv, cv);
            prop_assert_eq!(d.field("high"), c.field("high"));
            prop_assert_eq!(d.field("low"), c.field("low"));
        }
    }
}

//! Emergency transfer frequency and trend.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroute_core::{DomainError, DomainResult, LocationId};
use stockroute_transfers::Transfer;

/// Relative change between the two halves of the series that counts as a trend.
const TREND_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrequencyBucket {
    Daily,
    Weekly,
}

impl FrequencyBucket {
    /// First day of the bucket containing `date` (weeks start on Monday).
    pub fn start_of(self, date: NaiveDate) -> NaiveDate {
        match self {
            FrequencyBucket::Daily => date,
            FrequencyBucket::Weekly => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
        }
    }

    fn step(self) -> Days {
        match self {
            FrequencyBucket::Daily => Days::new(1),
            FrequencyBucket::Weekly => Days::new(7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyPoint {
    pub bucket_start: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyFrequency {
    pub bucket: FrequencyBucket,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// One point per bucket in range, empty buckets included.
    pub points: Vec<FrequencyPoint>,
    pub total: usize,
    pub average_per_bucket: f64,
    pub peak: usize,
    pub trend: Trend,
    pub by_destination: BTreeMap<LocationId, usize>,
}

impl EmergencyFrequency {
    pub fn latest(&self) -> Option<&FrequencyPoint> {
        self.points.last()
    }
}

/// Bucket the creation times of emergency transfers in `[from, to]`.
pub fn emergency_frequency(
    transfers: &[Transfer],
    bucket: FrequencyBucket,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> DomainResult<EmergencyFrequency> {
    if to < from {
        return Err(DomainError::validation("date range end precedes its start"));
    }

    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut cursor = bucket.start_of(from.date_naive());
    let last = bucket.start_of(to.date_naive());
    while cursor <= last {
        counts.insert(cursor, 0);
        match cursor.checked_add_days(bucket.step()) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    let mut by_destination = BTreeMap::new();
    let mut total = 0;
    for t in transfers
        .iter()
        .filter(|t| t.is_emergency() && t.created_at() >= from && t.created_at() <= to)
    {
        total += 1;
        *counts.entry(bucket.start_of(t.created_at().date_naive())).or_insert(0) += 1;
        *by_destination.entry(t.destination_location_id()).or_insert(0) += 1;
    }

    let points: Vec<FrequencyPoint> = counts
        .into_iter()
        .map(|(bucket_start, count)| FrequencyPoint { bucket_start, count })
        .collect();
    let average_per_bucket = if points.is_empty() {
        0.0
    } else {
        total as f64 / points.len() as f64
    };

    Ok(EmergencyFrequency {
        bucket,
        from,
        to,
        peak: points.iter().map(|p| p.count).max().unwrap_or(0),
        trend: trend(&points),
        points,
        total,
        average_per_bucket,
        by_destination,
    })
}

/// Compare the mean of the later half of the series with the earlier half.
fn trend(points: &[FrequencyPoint]) -> Trend {
    if points.len() < 2 {
        return Trend::Stable;
    }
    let mid = points.len() / 2;
    let mean = |xs: &[FrequencyPoint]| xs.iter().map(|p| p.count as f64).sum::<f64>() / xs.len() as f64;
    let earlier = mean(&points[..mid]);
    let later = mean(&points[points.len() - mid..]);

    if earlier == 0.0 {
        return if later > 0.0 { Trend::Increasing } else { Trend::Stable };
    }
    let change = (later - earlier) / earlier;
    if change > TREND_THRESHOLD {
        Trend::Increasing
    } else if change < -TREND_THRESHOLD {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

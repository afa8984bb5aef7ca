//! Mergeable aggregation state.
//!
//! Each aggregator serializes to a tagged blob whose leading byte is the
//! function id; cross-block merge identifies kind by that byte.

use std::collections::BTreeMap;

use wave_core::{Result, WaveError};
use wave_ssql::FuncName;

const TAG_AVG: u8 = 1;
const TAG_SUM: u8 = 2;
const TAG_MIN: u8 = 3;
const TAG_MAX: u8 = 4;
const TAG_COUNT: u8 = 5;
const TAG_PCTL: u8 = 6;

/// Base-10 log-linear histogram sketch with two significant digits,
/// supporting merge and quantile lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    /// Bucket key -> sample count. Keys are ordered the same way as the
    /// values they bucket, so the map iterates in value order.
    buckets: BTreeMap<i32, u64>,
    total: u64,
}

impl Histogram {
    pub fn record(&mut self, v: f64) {
        if !v.is_finite() {
            return;
        }
        *self.buckets.entry(bucket_key(v)).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn merge(&mut self, other: &Histogram) {
        for (&key, &count) in &other.buckets {
            *self.buckets.entry(key).or_insert(0) += count;
        }
        self.total += other.total;
    }

    /// Midpoint of the bucket holding quantile `q`; NaN when empty.
    pub fn value_at_quantile(&self, q: f64) -> f64 {
        if self.total == 0 {
            return f64::NAN;
        }
        let target = ((q.clamp(0.0, 1.0) * self.total as f64).ceil() as u64).max(1);
        let mut seen = 0u64;
        for (&key, &count) in &self.buckets {
            seen += count;
            if seen >= target {
                return bucket_midpoint(key);
            }
        }
        f64::NAN
    }
}

/// Bucket key: sign * ((exponent + 200) * 100 + two-digit mantissa). Keys
/// compare like the values they represent.
fn bucket_key(v: f64) -> i32 {
    if v == 0.0 {
        return 0;
    }
    let sign = if v < 0.0 { -1 } else { 1 };
    let a = v.abs();
    let e = a.log10().floor().clamp(-180.0, 180.0) as i32;
    let m = ((a / 10f64.powi(e - 1)).floor() as i32).clamp(10, 99);
    sign * ((e + 200) * 100 + m)
}

fn bucket_midpoint(key: i32) -> f64 {
    if key == 0 {
        return 0.0;
    }
    let sign = if key < 0 { -1.0 } else { 1.0 };
    let magnitude = key.abs();
    let e = magnitude / 100 - 200;
    let m = (magnitude % 100) as f64;
    sign * (m + 0.5) * 10f64.powi(e - 1)
}

/// Aggregation state; a tagged variant keyed by function id.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregator {
    Avg { sum: f64, count: u64 },
    Sum(f64),
    Min(f64),
    Max(f64),
    Count(i64),
    Pctl(Histogram),
}

impl Aggregator {
    pub fn new(func: FuncName) -> Option<Self> {
        match func {
            FuncName::Avg => Some(Self::Avg { sum: 0.0, count: 0 }),
            FuncName::Sum => Some(Self::Sum(0.0)),
            FuncName::Min => Some(Self::Min(f64::INFINITY)),
            FuncName::Max => Some(Self::Max(f64::NEG_INFINITY)),
            FuncName::Count => Some(Self::Count(0)),
            FuncName::Pctl => Some(Self::Pctl(Histogram::default())),
            FuncName::Part => None,
        }
    }

    pub fn step_int(&mut self, v: i64) {
        self.step_float(v as f64);
    }

    pub fn step_float(&mut self, v: f64) {
        match self {
            Self::Avg { sum, count } => {
                *sum += v;
                *count += 1;
            }
            Self::Sum(sum) => *sum += v,
            Self::Min(min) => *min = min.min(v),
            Self::Max(max) => *max = max.max(v),
            Self::Count(count) => *count += 1,
            Self::Pctl(hist) => hist.record(v),
        }
    }

    pub fn done_int(&self) -> i64 {
        match self {
            Self::Count(count) => *count,
            other => other.done_float(0.0) as i64,
        }
    }

    /// Finalized value; `q` is the quantile for percentile state and is
    /// ignored by the rest.
    pub fn done_float(&self, q: f64) -> f64 {
        match self {
            Self::Avg { sum, count } => {
                if *count == 0 {
                    0.0
                } else {
                    sum / *count as f64
                }
            }
            Self::Sum(sum) => *sum,
            Self::Min(min) => *min,
            Self::Max(max) => *max,
            Self::Count(count) => *count as f64,
            Self::Pctl(hist) => hist.value_at_quantile(q),
        }
    }

    /// Tagged blob; the first byte identifies the function.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Avg { sum, count } => {
                let mut out = vec![TAG_AVG];
                out.extend_from_slice(&sum.to_le_bytes());
                out.extend_from_slice(&count.to_le_bytes());
                out
            }
            Self::Sum(v) => tagged_f64(TAG_SUM, *v),
            Self::Min(v) => tagged_f64(TAG_MIN, *v),
            Self::Max(v) => tagged_f64(TAG_MAX, *v),
            Self::Count(v) => {
                let mut out = vec![TAG_COUNT];
                out.extend_from_slice(&v.to_le_bytes());
                out
            }
            Self::Pctl(hist) => {
                let mut out = vec![TAG_PCTL];
                out.extend_from_slice(&(hist.buckets.len() as u32).to_le_bytes());
                out.extend_from_slice(&hist.total.to_le_bytes());
                for (&key, &count) in &hist.buckets {
                    out.extend_from_slice(&key.to_le_bytes());
                    out.extend_from_slice(&count.to_le_bytes());
                }
                out
            }
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let bad = |what: &str| WaveError::AggregatorDecode(what.to_string());
        let tag = *data.first().ok_or_else(|| bad("empty blob"))?;
        let body = &data[1..];
        match tag {
            TAG_AVG => {
                if body.len() != 16 {
                    return Err(bad("avg blob size"));
                }
                Ok(Self::Avg {
                    sum: f64::from_le_bytes(body[..8].try_into().unwrap()),
                    count: u64::from_le_bytes(body[8..].try_into().unwrap()),
                })
            }
            TAG_SUM => Ok(Self::Sum(read_f64(body).ok_or_else(|| bad("sum blob size"))?)),
            TAG_MIN => Ok(Self::Min(read_f64(body).ok_or_else(|| bad("min blob size"))?)),
            TAG_MAX => Ok(Self::Max(read_f64(body).ok_or_else(|| bad("max blob size"))?)),
            TAG_COUNT => {
                if body.len() != 8 {
                    return Err(bad("count blob size"));
                }
                Ok(Self::Count(i64::from_le_bytes(body.try_into().unwrap())))
            }
            TAG_PCTL => {
                if body.len() < 12 {
                    return Err(bad("percentile blob size"));
                }
                let buckets = u32::from_le_bytes(body[..4].try_into().unwrap()) as usize;
                let total = u64::from_le_bytes(body[4..12].try_into().unwrap());
                let entries = &body[12..];
                if entries.len() != buckets * 12 {
                    return Err(bad("percentile bucket count"));
                }
                let mut hist = Histogram { buckets: BTreeMap::new(), total };
                for chunk in entries.chunks_exact(12) {
                    let key = i32::from_le_bytes(chunk[..4].try_into().unwrap());
                    let count = u64::from_le_bytes(chunk[4..].try_into().unwrap());
                    hist.buckets.insert(key, count);
                }
                Ok(Self::Pctl(hist))
            }
            other => Err(bad(&format!("unknown function id {other}"))),
        }
    }

    /// Merges another aggregator of the same kind; mismatched kinds are
    /// ignored.
    pub fn merge(&mut self, other: &Aggregator) {
        match (self, other) {
            (Self::Avg { sum, count }, Self::Avg { sum: s, count: c }) => {
                *sum += s;
                *count += c;
            }
            (Self::Sum(a), Self::Sum(b)) => *a += b,
            (Self::Min(a), Self::Min(b)) => *a = a.min(*b),
            (Self::Max(a), Self::Max(b)) => *a = a.max(*b),
            (Self::Count(a), Self::Count(b)) => *a += b,
            (Self::Pctl(a), Self::Pctl(b)) => a.merge(b),
            _ => {}
        }
    }

    /// Decodes and merges a tagged blob of the same kind.
    pub fn merge_bytes(&mut self, data: &[u8]) -> Result<()> {
        let other = Self::from_bytes(data)?;
        self.merge(&other);
        Ok(())
    }
}

fn tagged_f64(tag: u8, v: f64) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&v.to_le_bytes());
    out
}

fn read_f64(body: &[u8]) -> Option<f64> {
    Some(f64::from_le_bytes(body.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_over_partitions_matches_single_pass() {
        let mut whole = Aggregator::new(FuncName::Avg).unwrap();
        let mut left = Aggregator::new(FuncName::Avg).unwrap();
        let mut right = Aggregator::new(FuncName::Avg).unwrap();
        for v in [1.0, 2.0, 3.0, 4.0] {
            whole.step_float(v);
        }
        left.step_float(1.0);
        left.step_float(2.0);
        right.step_float(3.0);
        right.step_float(4.0);
        left.merge(&right);
        assert_eq!(whole.done_float(0.0), left.done_float(0.0));
    }

    #[test]
    fn min_max_sum_count_merge_bit_for_bit() {
        for func in [FuncName::Sum, FuncName::Min, FuncName::Max, FuncName::Count] {
            let mut whole = Aggregator::new(func).unwrap();
            let mut a = Aggregator::new(func).unwrap();
            let mut b = Aggregator::new(func).unwrap();
            for v in [5i64, -2, 9, 9, 0] {
                whole.step_int(v);
            }
            for v in [5i64, -2] {
                a.step_int(v);
            }
            for v in [9i64, 9, 0] {
                b.step_int(v);
            }
            a.merge(&b);
            assert_eq!(
                whole.done_float(0.0).to_bits(),
                a.done_float(0.0).to_bits(),
                "{func:?}"
            );
        }
    }

    #[test]
    fn blobs_round_trip() {
        let mut agg = Aggregator::new(FuncName::Avg).unwrap();
        agg.step_float(2.5);
        agg.step_int(7);
        let decoded = Aggregator::from_bytes(&agg.to_bytes()).unwrap();
        assert_eq!(decoded, agg);

        let mut count = Aggregator::new(FuncName::Count).unwrap();
        count.step_int(1);
        count.step_int(1);
        let decoded = Aggregator::from_bytes(&count.to_bytes()).unwrap();
        assert_eq!(decoded.done_int(), 2);

        let mut pctl = Aggregator::new(FuncName::Pctl).unwrap();
        for v in 1..=100 {
            pctl.step_int(v);
        }
        let decoded = Aggregator::from_bytes(&pctl.to_bytes()).unwrap();
        assert_eq!(decoded, pctl);
    }

    #[test]
    fn merge_bytes_accumulates() {
        let mut a = Aggregator::new(FuncName::Sum).unwrap();
        a.step_int(3);
        let mut b = Aggregator::new(FuncName::Sum).unwrap();
        b.step_int(4);
        a.merge_bytes(&b.to_bytes()).unwrap();
        assert_eq!(a.done_float(0.0), 7.0);
    }

    #[test]
    fn bad_blob_is_rejected() {
        assert!(Aggregator::from_bytes(&[]).is_err());
        assert!(Aggregator::from_bytes(&[99, 0, 0]).is_err());
        assert!(Aggregator::from_bytes(&[TAG_AVG, 1, 2]).is_err());
    }

    #[test]
    fn percentile_ingests_through_step() {
        let mut pctl = Aggregator::new(FuncName::Pctl).unwrap();
        for v in 1..=1000 {
            pctl.step_float(v as f64);
        }
        let median = pctl.done_float(0.5);
        assert!((400.0..=600.0).contains(&median), "median {median}");
        let p99 = pctl.done_float(0.99);
        assert!(p99 > median);
    }

    #[test]
    fn percentile_merge_equals_single_pass() {
        let mut whole = Aggregator::new(FuncName::Pctl).unwrap();
        let mut a = Aggregator::new(FuncName::Pctl).unwrap();
        let mut b = Aggregator::new(FuncName::Pctl).unwrap();
        for v in 0..500 {
            whole.step_float(v as f64);
            a.step_float(v as f64);
        }
        for v in 500..1000 {
            whole.step_float(v as f64);
            b.step_float(v as f64);
        }
        a.merge(&b);
        assert_eq!(whole, a);
    }

    #[test]
    fn histogram_buckets_order_like_values() {
        let mut keys: Vec<(f64, i32)> = [-250.0, -3.0, -0.5, 0.0, 0.7, 2.0, 99.0, 1e6]
            .into_iter()
            .map(|v| (v, bucket_key(v)))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_by(|a, b| a.1.cmp(&b.1));
        keys.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        assert_eq!(keys, sorted);
    }

    #[test]
    fn empty_percentile_is_nan() {
        let pctl = Aggregator::new(FuncName::Pctl).unwrap();
        assert!(pctl.done_float(0.5).is_nan());
    }
}

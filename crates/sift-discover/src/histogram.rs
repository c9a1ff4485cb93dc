//! Histogram bucketing
//!
//! Bucket sizes come from a "nice" progression so bin edges read well. Values
//! are scaled by `10^precision` and bucketed as integers; the scale is
//! divided back out when results are normalized.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sift_builder::{QueryBuilder, QueryRequest};
use sift_ir::{InvalidQuery, QueryError};
use sift_registry::function_alias;
use tracing::debug;

use crate::executor::{QueryExecutor, Row};
use crate::DiscoverError;

pub const MAX_BUCKETS: u64 = 100;
pub const MAX_PRECISION: u32 = 4;
/// Largest scaled bound; keeps bucket arithmetic inside `i64`.
const MAX_SCALED: f64 = 1e15;

/// Bucket layout for one histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramParams {
    pub num_buckets: u64,
    pub bucket_size: u64,
    /// Scaled lower edge of the first bucket.
    pub start_offset: i64,
    pub multiplier: u64,
}

impl HistogramParams {
    /// Used when no data bounds the histogram.
    pub fn degenerate(num_buckets: u64, precision: u32) -> Result<Self, QueryError> {
        Ok(Self {
            num_buckets,
            bucket_size: 1,
            start_offset: 0,
            multiplier: multiplier(num_buckets, precision)?,
        })
    }

    /// Scaled upper edge (exclusive) of the last bucket.
    pub fn upper_edge(&self) -> i64 {
        self.start_offset + (self.num_buckets * self.bucket_size) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub bin: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub params: HistogramParams,
    pub buckets: Vec<HistogramBucket>,
}

/// Round up to the next value of 1, 2, 5, 10 below ten and
/// 1, 2, 2.5, 5, 10 times a power of ten above it. Never below 1.
pub fn nice_int(value: f64) -> u64 {
    if value <= 1.0 {
        return 1;
    }
    let exponent = value.log10().floor() as i32;
    let (base, steps): (f64, &[f64]) = if exponent == 0 {
        (1.0, &[1.0, 2.0, 5.0, 10.0])
    } else {
        (10f64.powi(exponent - 1), &[10.0, 20.0, 25.0, 50.0, 100.0])
    };
    let fraction = value / base;
    let step = steps
        .iter()
        .copied()
        .find(|step| fraction <= *step + f64::EPSILON * step)
        .unwrap_or(100.0);
    (step * base).round() as u64
}

/// Checks the bucket count and returns the `10^precision` scale.
fn multiplier(num_buckets: u64, precision: u32) -> Result<u64, QueryError> {
    if num_buckets == 0 || num_buckets > MAX_BUCKETS {
        return Err(QueryError::invalid(format!(
            "num_buckets must be between 1 and {}",
            MAX_BUCKETS
        )));
    }
    if precision > MAX_PRECISION {
        return Err(QueryError::invalid(format!(
            "precision must be between 0 and {}",
            MAX_PRECISION
        )));
    }
    Ok(10u64.pow(precision))
}

/// Derive bucket size, offset and count covering `[min, max]`.
pub fn compute_buckets(num_buckets: u64, min: f64, max: f64, precision: u32) -> Result<HistogramParams, QueryError> {
    let multiplier = multiplier(num_buckets, precision)?;
    let scaled = |value: f64| value * multiplier as f64;
    if !min.is_finite() || !max.is_finite() || max < min || scaled(min).abs() > MAX_SCALED || scaled(max).abs() > MAX_SCALED
    {
        return Err(InvalidQuery::InvalidValue {
            field: "histogram".to_string(),
            value: format!("[{}, {}]", min, max),
        }
        .into());
    }

    let scaled_min = scaled(min).floor() as i64;
    let scaled_max = scaled(max).ceil() as i64;

    let mut bucket_size = nice_int((scaled_max - scaled_min) as f64 / num_buckets as f64);
    let mut start_offset = floor_to(scaled_min, bucket_size);
    // The last edge is exclusive, so the maximum must sit strictly below it.
    while start_offset + (num_buckets * bucket_size) as i64 <= scaled_max {
        bucket_size = nice_int((bucket_size + 1) as f64);
        start_offset = floor_to(scaled_min, bucket_size);
    }

    let last_bin = floor_to(scaled_max - start_offset, bucket_size) + start_offset;
    let num_buckets = ((last_bin - start_offset) as u64) / bucket_size + 1;

    Ok(HistogramParams {
        num_buckets,
        bucket_size,
        start_offset,
        multiplier,
    })
}

fn floor_to(value: i64, size: u64) -> i64 {
    value.div_euclid(size as i64) * size as i64
}

/// Dense bucket list from sparse `(bucket, count)` rows. Missing buckets count zero.
pub fn normalize(rows: &[Row], bucket_key: &str, count_key: &str, params: &HistogramParams) -> Vec<HistogramBucket> {
    let counts: HashMap<i64, u64> = rows
        .iter()
        .filter_map(|row| {
            let bucket = row.get(bucket_key)?.as_f64()?.round() as i64;
            let count = row.get(count_key).and_then(|c| c.as_u64()).unwrap_or(0);
            Some((bucket, count))
        })
        .collect();

    (0..params.num_buckets)
        .map(|i| {
            let bin = params.start_offset + (i * params.bucket_size) as i64;
            HistogramBucket {
                bin: bin as f64 / params.multiplier as f64,
                count: counts.get(&bin).copied().unwrap_or(0),
            }
        })
        .collect()
}

/// A histogram over one numeric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramRequest {
    pub field: String,
    pub num_buckets: u64,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub query: String,
    /// Cap the maximum at the upper outlier fence, `Q3 + 3 * IQR`.
    #[serde(default)]
    pub exclude_outliers: bool,
}

/// Query missing bounds, bucket the field and return dense counts.
pub fn histogram_query(
    builder: &QueryBuilder<'_>,
    request: &HistogramRequest,
    executor: &dyn QueryExecutor,
) -> Result<Histogram, DiscoverError> {
    let (min, max) = match (request.min, request.max) {
        (Some(min), Some(max)) => (Some(min), Some(max)),
        _ => query_bounds(builder, request, executor)?,
    };
    let (Some(min), Some(max)) = (min, max) else {
        debug!(field = %request.field, "No data to bound histogram");
        return Ok(Histogram {
            params: HistogramParams::degenerate(request.num_buckets, request.precision)?,
            buckets: Vec::new(),
        });
    };

    let params = compute_buckets(request.num_buckets, min, max.max(min), request.precision)?;
    let arguments = vec![
        request.field.clone(),
        params.bucket_size.to_string(),
        params.start_offset.to_string(),
        params.multiplier.to_string(),
    ];
    let bucket_alias = function_alias("histogram", &arguments);
    let plan = builder.build(&QueryRequest {
        query: request.query.clone(),
        selected: vec![format!("histogram({})", arguments.join(", ")), "count()".to_string()],
        orderby: vec![bucket_alias.clone()],
        limit: Some(params.num_buckets),
        ..Default::default()
    })?;
    debug!(field = %request.field, ?params, "Running histogram query");

    let result = executor.execute(&plan, "discover.histogram")?;
    Ok(Histogram {
        buckets: normalize(&result.rows, &bucket_alias, "count", &params),
        params,
    })
}

/// Observed min and max of the field, with the max optionally fenced.
fn query_bounds(
    builder: &QueryBuilder<'_>,
    request: &HistogramRequest,
    executor: &dyn QueryExecutor,
) -> Result<(Option<f64>, Option<f64>), DiscoverError> {
    let field = request.field.as_str();
    let mut selected = vec![format!("min({})", field), format!("max({})", field)];
    if request.exclude_outliers {
        selected.push(format!("percentile({}, 0.25)", field));
        selected.push(format!("percentile({}, 0.75)", field));
    }
    let plan = builder.build(&QueryRequest {
        query: request.query.clone(),
        selected,
        limit: Some(1),
        ..Default::default()
    })?;
    let result = executor.execute(&plan, "discover.histogram.bounds")?;
    let Some(row) = result.rows.first() else {
        return Ok((None, None));
    };

    let value = |name: &str, args: &[&str]| {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        row.get(&function_alias(name, &args)).and_then(|v| v.as_f64())
    };
    let min = request.min.or_else(|| value("min", &[field]));
    let mut max = request.max.or_else(|| value("max", &[field]));
    if request.max.is_none() && request.exclude_outliers {
        if let (Some(q1), Some(q3)) = (value("percentile", &[field, "0.25"]), value("percentile", &[field, "0.75"])) {
            let fence = q3 + 3.0 * (q3 - q1);
            max = max.map(|m| m.min(fence));
        }
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nice_int() {
        let cases = [
            (0.0, 1),
            (1.0, 1),
            (1.5, 2),
            (3.0, 5),
            (9.7, 10),
            (10.0, 10),
            (11.0, 20),
            (21.0, 25),
            (26.0, 50),
            (51.0, 100),
            (120.0, 200),
            (230.0, 250),
            (2600.0, 5000),
        ];
        for (value, expected) in cases {
            assert_eq!(nice_int(value), expected, "nice_int({})", value);
        }
    }

    #[test]
    fn test_compute_buckets_covers_max() {
        let params = compute_buckets(10, 0.0, 97.0, 0).unwrap();
        assert_eq!(params.bucket_size, 10);
        assert_eq!(params.start_offset, 0);
        assert_eq!(params.num_buckets, 10);
        assert!(params.upper_edge() >= 97);
    }

    #[test]
    fn test_max_on_bucket_boundary_grows_bucket() {
        // 100 / 10 = 10, but 100 would fall on the exclusive edge.
        let params = compute_buckets(10, 0.0, 100.0, 0).unwrap();
        assert_eq!(params.bucket_size, 20);
        assert!(params.upper_edge() > 100);
        assert_eq!(params.num_buckets, 6);
    }

    #[test]
    fn test_equal_bounds() {
        let params = compute_buckets(10, 5.0, 5.0, 0).unwrap();
        assert!(params.num_buckets >= 1);
        assert!(params.bucket_size >= 1);
        assert_eq!(params.start_offset, 5);
    }

    #[test]
    fn test_precision_scales_bounds() {
        let params = compute_buckets(5, 0.1, 0.5, 2).unwrap();
        assert_eq!(params.multiplier, 100);
        assert_eq!(params.start_offset, 10);
        assert!(params.upper_edge() > 50);
    }

    #[test]
    fn test_offset_is_floored_to_bucket() {
        let params = compute_buckets(4, 13.0, 57.0, 0).unwrap();
        assert_eq!(params.start_offset % params.bucket_size as i64, 0);
        assert!(params.start_offset <= 13);
        assert!(params.upper_edge() > 57);
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(compute_buckets(0, 0.0, 1.0, 0).is_err());
        assert!(compute_buckets(10, 5.0, 1.0, 0).is_err());
    }

    #[test]
    fn test_precision_and_bucket_limits() {
        for (num_buckets, precision) in [(10, 25), (10, MAX_PRECISION + 1), (MAX_BUCKETS + 1, 0), (u64::MAX, 0)] {
            let err = compute_buckets(num_buckets, 0.0, 1.0, precision).unwrap_err();
            assert!(matches!(err, QueryError::InvalidSearchQuery(_)), "{:?}", err);
            assert!(HistogramParams::degenerate(num_buckets, precision).is_err());
        }
        assert!(compute_buckets(10, 0.0, 1e14, MAX_PRECISION).is_err());
        assert!(compute_buckets(10, f64::MIN, 0.0, 0).is_err());

        let params = compute_buckets(MAX_BUCKETS, 0.0, 1.0, MAX_PRECISION).unwrap();
        assert_eq!(params.multiplier, 10_000);
        assert!(params.upper_edge() > 10_000);
        assert_eq!(HistogramParams::degenerate(MAX_BUCKETS, 0).unwrap().multiplier, 1);
    }

    #[test]
    fn test_normalize_zero_fills() {
        let params = HistogramParams {
            num_buckets: 4,
            bucket_size: 10,
            start_offset: 0,
            multiplier: 10,
        };
        let rows: Vec<Row> = vec![
            json!({"bucket": 10, "count": 3}),
            json!({"bucket": 30, "count": 1}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        let buckets = normalize(&rows, "bucket", "count", &params);
        assert_eq!(
            buckets,
            vec![
                HistogramBucket { bin: 0.0, count: 0 },
                HistogramBucket { bin: 1.0, count: 3 },
                HistogramBucket { bin: 2.0, count: 0 },
                HistogramBucket { bin: 3.0, count: 1 },
            ]
        );
    }
}

//! Aggregator evaluation: reducing one `[start_row, end_row]` window of
//! a chunk to a single output cell.
//!
//! All reductions operate directly on the paged column vectors through
//! the typed readers and allocate nothing per row; the histogram sum
//! folds into a single accumulator.

use crate::paged::{ChunkInfo, PagedRawPartition};
use data_types::{histogram, ColumnValue, Histogram};
use schema::{AggregatorSpec, DoubleAggKind, HistAggKind};
use snafu::{ResultExt, Snafu};

/// Errors evaluating an aggregator over a window.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("cannot read aggregation source column: {source}"))]
    Read { source: crate::paged::Error },

    #[snafu(display("histogram cell is invalid: {source}"))]
    BadHistogram { source: histogram::Error },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reduce rows `start_row..=end_row` of `chunk` according to `agg`.
/// The time aggregator emits `period_end`, not anything read from the
/// data.
pub fn reduce(
    part: &PagedRawPartition,
    chunk: &ChunkInfo,
    agg: &AggregatorSpec,
    start_row: usize,
    end_row: usize,
    period_end: i64,
) -> Result<ColumnValue> {
    match agg {
        AggregatorSpec::Time { .. } => Ok(ColumnValue::Timestamp(period_end)),
        AggregatorSpec::Double { kind, col } => {
            let reader = part.double_reader(chunk, *col).context(ReadSnafu)?;
            let v = match kind {
                DoubleAggKind::Min => {
                    let mut acc = f64::NAN;
                    for i in start_row..=end_row {
                        let v = reader.value(i);
                        if !v.is_nan() && (acc.is_nan() || v < acc) {
                            acc = v;
                        }
                    }
                    acc
                }
                DoubleAggKind::Max => {
                    let mut acc = f64::NAN;
                    for i in start_row..=end_row {
                        let v = reader.value(i);
                        if !v.is_nan() && (acc.is_nan() || v > acc) {
                            acc = v;
                        }
                    }
                    acc
                }
                DoubleAggKind::Sum => sum_skipping_nan(&reader, start_row, end_row).0,
                DoubleAggKind::Count => sum_skipping_nan(&reader, start_row, end_row).1 as f64,
                DoubleAggKind::Avg => {
                    let (sum, count) = sum_skipping_nan(&reader, start_row, end_row);
                    // empty windows never reach the aggregators, but a
                    // window of only NaNs averages to NaN
                    sum / count as f64
                }
                DoubleAggKind::Last => reader.value(end_row),
            };
            Ok(ColumnValue::F64(v))
        }
        AggregatorSpec::Histogram { kind, col } => {
            let reader = part.hist_reader(chunk, *col).context(ReadSnafu)?;
            let h = match kind {
                HistAggKind::Sum => {
                    let mut acc: Option<Histogram> = None;
                    for i in start_row..=end_row {
                        let h = reader.histogram(i).context(BadHistogramSnafu)?;
                        match acc.as_mut() {
                            None => acc = Some(h),
                            Some(a) => a.checked_add_assign(&h).context(BadHistogramSnafu)?,
                        }
                    }
                    // start_row <= end_row, so the fold saw at least one cell
                    acc.expect("non-empty window")
                }
                HistAggKind::Last => reader.histogram(end_row).context(BadHistogramSnafu)?,
            };
            Ok(ColumnValue::Histogram(h))
        }
    }
}

fn sum_skipping_nan(
    reader: &crate::read::DoubleReader<'_>,
    start_row: usize,
    end_row: usize,
) -> (f64, u64) {
    let mut sum = f64::NAN;
    let mut count = 0u64;
    for i in start_row..=end_row {
        let v = reader.value(i);
        if !v.is_nan() {
            sum = if count == 0 { v } else { sum + v };
            count += 1;
        }
    }
    (sum, count)
}

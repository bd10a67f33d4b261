//! Per-resolution time-window aggregation over one raw partition.
//!
//! Periods are left-open, right-closed: a sample at `t` belongs to the
//! period ending at the next multiple of the resolution at or above
//! `t`, so a sample exactly on a period boundary closes that period.
//! A period is emitted iff its end lies inside the user time window,
//! which attributes boundary-straddling periods to exactly one batch.

use crate::{
    aggregate,
    paged::PagedRawPartition,
    partition::DownsamplePartition,
};
use arena::BlockFactory;
use data_types::{ColumnValue, Resolution, TimeRange};
use schema::AggregatorSpec;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;

/// Errors downsampling one raw partition.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("cannot read timestamp column: {source}"))]
    ReadTimestamps { source: crate::paged::Error },

    #[snafu(display("aggregator failed: {source}"))]
    Aggregate { source: aggregate::Error },

    #[snafu(display("cannot ingest aggregate row: {source}"))]
    Ingest { source: crate::partition::Error },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Drives the chunk × resolution × period loop for one raw partition,
/// reusing a single row buffer across windows.
#[derive(Debug)]
pub struct WindowDownsampler<'a> {
    aggs: &'a [AggregatorSpec],
    row: Vec<ColumnValue>,
}

impl<'a> WindowDownsampler<'a> {
    /// A downsampler evaluating `aggs`, one per downsample column.
    pub fn new(aggs: &'a [AggregatorSpec]) -> Self {
        Self {
            aggs,
            row: Vec::with_capacity(aggs.len()),
        }
    }

    /// Aggregate every period of every chunk of `part` into the
    /// per-resolution output partitions. All rows of the batch are
    /// ingested at `window.start` so re-runs are deterministic.
    pub fn run(
        &mut self,
        part: &PagedRawPartition,
        outs: &mut BTreeMap<Resolution, DownsamplePartition>,
        factory: &mut BlockFactory,
        window: TimeRange,
    ) -> Result<()> {
        for chunk in part.chunk_infos() {
            let ts_reader = part.long_reader(chunk, 0).context(ReadTimestampsSnafu)?;

            for (resolution, ds_part) in outs.iter_mut() {
                let r = resolution.as_millis();
                // left-open periods: a sample exactly on a multiple of
                // the resolution closes the period it ends
                let mut p_start = ((chunk.start_time - 1).div_euclid(r)) * r + 1;
                let mut p_end = p_start + r - 1;

                while p_start <= chunk.end_time {
                    if window.contains(p_end) {
                        let s_row = ts_reader.lower_bound(p_start);
                        if let Some(e_row) = ts_reader.last_at_or_before(p_end) {
                            if s_row <= e_row {
                                self.row.clear();
                                for agg in self.aggs {
                                    self.row.push(
                                        aggregate::reduce(part, chunk, agg, s_row, e_row, p_end)
                                            .context(AggregateSnafu)?,
                                    );
                                }
                                ds_part
                                    .ingest(factory, window.start, &self.row)
                                    .context(IngestSnafu)?;
                            }
                        }
                    }
                    p_start += r;
                    p_end += r;
                }
            }
        }
        Ok(())
    }
}

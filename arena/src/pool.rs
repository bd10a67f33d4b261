//! Per-schema pools of typed write buffers for downsample ingestion.

use data_types::{vector, ColumnValue};
use observability_deps::tracing::debug;
use schema::{ColumnType, DownsampleSchema};
use snafu::{ensure, Snafu};
use std::sync::Arc;

/// Errors appending rows to a write buffer set.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("row has {actual} cells, schema has {expected} columns"))]
    RowArity { expected: usize, actual: usize },

    #[snafu(display("cell {col} does not match column type {expected:?}"))]
    CellType { col: usize, expected: ColumnType },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Append-only growable buffer for one downsample column.
#[derive(Debug)]
pub enum ColumnBuffer {
    /// Timestamps.
    I64(Vec<i64>),
    /// Floats.
    F64(Vec<f64>),
    /// Histogram payloads plus row offsets.
    Hist {
        /// `rows + 1` offsets into `payload`.
        offsets: Vec<u32>,
        /// Concatenated serialized histograms.
        payload: Vec<u8>,
    },
}

impl ColumnBuffer {
    fn for_type(column_type: ColumnType, rows_per_chunk: usize) -> Self {
        match column_type {
            ColumnType::Timestamp => Self::I64(Vec::with_capacity(rows_per_chunk)),
            ColumnType::F64 => Self::F64(Vec::with_capacity(rows_per_chunk)),
            ColumnType::Histogram => Self::Hist {
                offsets: {
                    let mut o = Vec::with_capacity(rows_per_chunk + 1);
                    o.push(0);
                    o
                },
                payload: vec![],
            },
        }
    }

    fn push(&mut self, col: usize, value: &ColumnValue) -> Result<()> {
        match (self, value) {
            (Self::I64(buf), ColumnValue::Timestamp(v)) => buf.push(*v),
            (Self::F64(buf), ColumnValue::F64(v)) => buf.push(*v),
            (Self::Hist { offsets, payload }, ColumnValue::Histogram(h)) => {
                h.encode_into(payload);
                offsets.push(payload.len() as u32);
            }
            (buf, _) => {
                let expected = match buf {
                    Self::I64(_) => ColumnType::Timestamp,
                    Self::F64(_) => ColumnType::F64,
                    Self::Hist { .. } => ColumnType::Histogram,
                };
                return CellTypeSnafu { col, expected }.fail();
            }
        }
        Ok(())
    }

    fn clear(&mut self) {
        match self {
            Self::I64(buf) => buf.clear(),
            Self::F64(buf) => buf.clear(),
            Self::Hist { offsets, payload } => {
                offsets.clear();
                offsets.push(0);
                payload.clear();
            }
        }
    }

    /// Encode the buffered cells as a canonical column vector.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::I64(buf) => vector::encode_i64s(buf, out),
            Self::F64(buf) => vector::encode_f64s(buf, out),
            Self::Hist { offsets, payload } => vector::encode_hist_vector(offsets, payload, out),
        }
    }

    /// Estimated encoded size of the buffered cells.
    pub fn encoded_size(&self) -> usize {
        match self {
            Self::I64(buf) => buf.len() * 8,
            Self::F64(buf) => buf.len() * 8,
            Self::Hist { offsets, payload } => 4 + offsets.len() * 4 + payload.len(),
        }
    }
}

/// One write buffer per downsample column, filled a row at a time.
#[derive(Debug)]
pub struct WriteBufferSet {
    columns: Vec<ColumnBuffer>,
    num_rows: usize,
}

impl WriteBufferSet {
    fn new(schema: &DownsampleSchema) -> Self {
        let columns = schema
            .columns()
            .iter()
            .map(|c| ColumnBuffer::for_type(c.column_type, schema.rows_per_chunk()))
            .collect();
        Self {
            columns,
            num_rows: 0,
        }
    }

    /// Append one aggregate row across all column buffers.
    pub fn push_row(&mut self, row: &[ColumnValue]) -> Result<()> {
        ensure!(
            row.len() == self.columns.len(),
            RowAritySnafu {
                expected: self.columns.len(),
                actual: row.len(),
            }
        );
        for (col, (buf, value)) in self.columns.iter_mut().zip(row).enumerate() {
            buf.push(col, value)?;
        }
        self.num_rows += 1;
        Ok(())
    }

    /// Buffered row count.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Whether no rows are buffered.
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// The per-column buffers.
    pub fn columns(&self) -> &[ColumnBuffer] {
        &self.columns
    }

    /// First and last buffered timestamp (column 0), if any rows are
    /// buffered.
    pub fn time_bounds(&self) -> Option<(i64, i64)> {
        match &self.columns[0] {
            ColumnBuffer::I64(buf) => {
                let first = buf.first()?;
                let last = buf.last()?;
                Some((*first, *last))
            }
            _ => None,
        }
    }

    /// Estimated encoded size of all buffered vectors.
    pub fn encoded_size(&self) -> usize {
        self.columns.iter().map(ColumnBuffer::encoded_size).sum()
    }

    /// Drop all buffered rows, retaining allocations.
    pub fn clear(&mut self) {
        for buf in &mut self.columns {
            buf.clear();
        }
        self.num_rows = 0;
    }
}

/// Recycles [`WriteBufferSet`]s for one schema's downsample partitions.
/// Sized so the expected number of concurrently live partitions never
/// allocates past the pre-populated sets.
#[derive(Debug)]
pub struct BufferPool {
    schema: Arc<DownsampleSchema>,
    free: Vec<WriteBufferSet>,
    outstanding: usize,
}

impl BufferPool {
    /// Create a pool pre-populated for `expected_partitions` concurrent
    /// checkouts.
    pub fn new(schema: Arc<DownsampleSchema>, expected_partitions: usize) -> Self {
        let free = (0..expected_partitions)
            .map(|_| WriteBufferSet::new(&schema))
            .collect();
        Self {
            schema,
            free,
            outstanding: 0,
        }
    }

    /// The downsample schema this pool buffers for.
    pub fn schema(&self) -> &Arc<DownsampleSchema> {
        &self.schema
    }

    /// Take a buffer set, growing the pool if the expectation was
    /// undersized.
    pub fn checkout(&mut self) -> WriteBufferSet {
        self.outstanding += 1;
        self.free.pop().unwrap_or_else(|| {
            debug!(outstanding = self.outstanding, "buffer pool grew past expectation");
            WriteBufferSet::new(&self.schema)
        })
    }

    /// Return a buffer set to the pool.
    pub fn give_back(&mut self, mut set: WriteBufferSet) {
        set.clear();
        self.free.push(set);
        self.outstanding -= 1;
    }

    /// Buffer sets currently checked out.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

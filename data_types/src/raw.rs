//! Raw partition data as it arrives from the long-term store.
//!
//! A [`RawPartData`] is an opaque blob: a partition key (schema id
//! prefix plus schema-defined fields) followed by a directory of chunks,
//! each carrying its time bounds, row count, and column vectors in the
//! canonical layout. The blob is paged into arena memory and consumed
//! through a read interface by the downsampler; [`RawPartBuilder`]
//! assembles well-formed blobs on the producing side.

use crate::{histogram::Histogram, vector, SchemaId};
use bytes::{BufMut, Bytes};
use snafu::{ensure, Snafu};

/// Errors assembling or inspecting raw partition blobs.
#[derive(Debug, Snafu)]
#[allow(missing_copy_implementations, missing_docs)]
pub enum Error {
    #[snafu(display("raw partition blob of {len} bytes is truncated"))]
    Truncated { len: usize },

    #[snafu(display("chunk has no rows"))]
    EmptyChunk,

    #[snafu(display("chunk timestamps are not strictly increasing at row {row}"))]
    TimestampsNotIncreasing { row: usize },

    #[snafu(display(
        "chunk starting at {start} overlaps the previous chunk ending at {prev_end}"
    ))]
    ChunkOverlap { start: i64, prev_end: i64 },

    #[snafu(display("column {col} has {actual} rows, expected {expected}"))]
    ColumnLength {
        col: usize,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("partition key of {len} bytes exceeds the key length limit"))]
    KeyTooLong { len: usize },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One raw partition's worth of bytes: partition key plus chunk
/// directory. Opaque until paged into arena memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPartData(Bytes);

impl RawPartData {
    /// Wrap an encoded raw partition blob.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// The raw blob bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// The partition key bytes at the head of the blob.
    pub fn partition_key(&self) -> Result<&[u8]> {
        let data = self.bytes();
        ensure!(data.len() >= 2, TruncatedSnafu { len: data.len() });
        let key_len = u16::from_le_bytes([data[0], data[1]]) as usize;
        ensure!(
            data.len() >= 2 + key_len,
            TruncatedSnafu { len: data.len() }
        );
        Ok(&data[2..2 + key_len])
    }
}

/// One data column of a chunk being assembled by [`RawPartBuilder`].
/// The timestamp column is supplied separately.
#[derive(Debug, Clone)]
pub enum RawColumn {
    /// A floating point column.
    F64(Vec<f64>),
    /// A histogram column.
    Histogram(Vec<Histogram>),
}

impl RawColumn {
    fn len(&self) -> usize {
        match self {
            Self::F64(v) => v.len(),
            Self::Histogram(v) => v.len(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Self::F64(values) => {
                let mut out = vec![];
                vector::encode_f64s(values, &mut out);
                out
            }
            Self::Histogram(values) => {
                let mut payload = vec![];
                let mut offsets = vec![0u32];
                for h in values {
                    h.encode_into(&mut payload);
                    offsets.push(payload.len() as u32);
                }
                let mut out = vec![];
                vector::encode_hist_vector(&offsets, &payload, &mut out);
                out
            }
        }
    }
}

#[derive(Debug)]
struct BuiltChunk {
    start_time: i64,
    end_time: i64,
    num_rows: u32,
    columns: Vec<Vec<u8>>,
}

/// Assembles a well-formed [`RawPartData`] blob: strictly increasing
/// timestamps per chunk, non-overlapping chunks in start-time order.
#[derive(Debug)]
pub struct RawPartBuilder {
    key: Vec<u8>,
    chunks: Vec<BuiltChunk>,
}

impl RawPartBuilder {
    /// Start a partition blob for the given schema and key fields.
    pub fn new(schema_id: SchemaId, key_fields: &[u8]) -> Self {
        let mut key = schema_id.get().to_le_bytes().to_vec();
        key.extend_from_slice(key_fields);
        Self { key, chunks: vec![] }
    }

    /// Append one chunk. `timestamps` is the timestamp column; the data
    /// columns follow in schema order.
    pub fn with_chunk(mut self, timestamps: &[i64], columns: &[RawColumn]) -> Result<Self> {
        ensure!(!timestamps.is_empty(), EmptyChunkSnafu);
        for (row, pair) in timestamps.windows(2).enumerate() {
            ensure!(pair[0] < pair[1], TimestampsNotIncreasingSnafu { row: row + 1 });
        }

        let start_time = timestamps[0];
        let end_time = timestamps[timestamps.len() - 1];
        if let Some(prev) = self.chunks.last() {
            ensure!(
                start_time > prev.end_time,
                ChunkOverlapSnafu {
                    start: start_time,
                    prev_end: prev.end_time,
                }
            );
        }

        for (col, c) in columns.iter().enumerate() {
            ensure!(
                c.len() == timestamps.len(),
                ColumnLengthSnafu {
                    col: col + 1,
                    expected: timestamps.len(),
                    actual: c.len(),
                }
            );
        }

        let mut encoded = Vec::with_capacity(columns.len() + 1);
        let mut ts_vec = vec![];
        vector::encode_i64s(timestamps, &mut ts_vec);
        encoded.push(ts_vec);
        encoded.extend(columns.iter().map(RawColumn::encode));

        self.chunks.push(BuiltChunk {
            start_time,
            end_time,
            num_rows: timestamps.len() as u32,
            columns: encoded,
        });
        Ok(self)
    }

    /// Encode the assembled blob.
    pub fn build(self) -> Result<RawPartData> {
        ensure!(
            self.key.len() <= u16::MAX as usize,
            KeyTooLongSnafu {
                len: self.key.len(),
            }
        );

        let mut out: Vec<u8> = vec![];
        out.put_u16_le(self.key.len() as u16);
        out.put_slice(&self.key);
        out.put_u16_le(self.chunks.len() as u16);
        for chunk in &self.chunks {
            out.put_i64_le(chunk.start_time);
            out.put_i64_le(chunk.end_time);
            out.put_u32_le(chunk.num_rows);
            out.put_u16_le(chunk.columns.len() as u16);
            for col in &chunk.columns {
                out.put_u32_le(col.len() as u32);
                out.put_slice(col);
            }
        }
        Ok(RawPartData::new(out))
    }
}

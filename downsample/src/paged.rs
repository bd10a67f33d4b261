//! Adapts a raw partition blob into a readable columnar partition.
//!
//! Construction validates the chunk directory against the schema and
//! pages the blob into a native buffer from the arena allocator; the
//! typed readers then work directly on the paged vectors. `free()`
//! returns the buffer to the allocator and is idempotent.

use crate::read::{DoubleReader, HistogramReader, LongReader};
use arena::{NativeAllocator, NativeBuffer};
use data_types::{raw, vector, PartitionKey, RawPartData, SchemaId};
use schema::{ColumnType, RawSchema};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::sync::Arc;

/// Errors paging or reading a raw partition.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("raw partition blob is truncated at byte {at}"))]
    Truncated { at: usize },

    #[snafu(display("invalid partition key: {source}"))]
    BadKey { source: raw::Error },

    #[snafu(display("invalid schema id prefix: {source}"))]
    BadSchemaId { source: data_types::Error },

    #[snafu(display("partition carries schema id {found}, expected {expected}"))]
    SchemaIdMismatch { expected: SchemaId, found: SchemaId },

    #[snafu(display("chunk {chunk} has {actual} columns, schema has {expected}"))]
    ColumnCount {
        chunk: usize,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("chunk {chunk} column {col} is invalid: {source}"))]
    BadVector {
        chunk: usize,
        col: usize,
        source: vector::Error,
    },

    #[snafu(display("chunk {chunk} has no rows"))]
    NoRows { chunk: usize },

    #[snafu(display("chunk {chunk} time bounds disagree with its timestamp vector"))]
    TimeBounds { chunk: usize },

    #[snafu(display("chunk {chunk} does not start after the previous chunk"))]
    ChunkOrder { chunk: usize },

    #[snafu(display("column {col} out of range, schema has {columns} columns"))]
    ColumnOutOfRange { col: usize, columns: usize },

    #[snafu(display("column {col} is {found:?}, expected {expected:?}"))]
    WrongColumnType {
        col: usize,
        expected: ColumnType,
        found: ColumnType,
    },

    #[snafu(display("partition has been freed"))]
    Freed,
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Directory entry for one paged chunk.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    /// Timestamp of the chunk's first row.
    pub start_time: i64,
    /// Timestamp of the chunk's last row.
    pub end_time: i64,
    /// Number of rows.
    pub num_rows: u32,
    /// Per-column `(offset, len)` into the paged blob.
    vectors: Vec<(usize, usize)>,
}

/// A raw partition paged into arena memory, readable per column.
#[derive(Debug)]
pub struct PagedRawPartition {
    schema: Arc<RawSchema>,
    partition_key: PartitionKey,
    chunks: Vec<ChunkInfo>,
    buf: Option<NativeBuffer>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(self.pos + n <= self.data.len(), TruncatedSnafu { at: self.pos });
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let s = self.take(2)?;
        Ok(u16::from_le_bytes([s[0], s[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let s = self.take(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let s = self.take(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(s);
        Ok(i64::from_le_bytes(b))
    }
}

impl PagedRawPartition {
    /// Validate `raw` against `schema` and page it into a buffer from
    /// `allocator`.
    pub fn new(
        schema: Arc<RawSchema>,
        raw: &RawPartData,
        allocator: &mut NativeAllocator,
    ) -> Result<Self> {
        let key = raw.partition_key().context(BadKeySnafu)?;
        let found = SchemaId::from_key(key).context(BadSchemaIdSnafu)?;
        ensure!(
            found == schema.id(),
            SchemaIdMismatchSnafu {
                expected: schema.id(),
                found,
            }
        );
        let partition_key = PartitionKey::new(key.to_vec());

        let data = raw.bytes();
        let mut cur = Cursor {
            data,
            pos: 2 + key.len(),
        };

        let n_chunks = cur.read_u16()? as usize;
        let n_cols = schema.columns().len();
        let mut chunks = Vec::with_capacity(n_chunks);
        let mut prev_end = i64::MIN;

        for chunk in 0..n_chunks {
            let start_time = cur.read_i64()?;
            let end_time = cur.read_i64()?;
            let num_rows = cur.read_u32()?;
            let actual_cols = cur.read_u16()? as usize;

            ensure!(num_rows >= 1, NoRowsSnafu { chunk });
            ensure!(start_time <= end_time, TimeBoundsSnafu { chunk });
            ensure!(
                actual_cols == n_cols,
                ColumnCountSnafu {
                    chunk,
                    expected: n_cols,
                    actual: actual_cols,
                }
            );
            ensure!(start_time > prev_end, ChunkOrderSnafu { chunk });
            prev_end = end_time;

            let mut vectors = Vec::with_capacity(n_cols);
            for (col, spec) in schema.columns().iter().enumerate() {
                let len = cur.read_u32()? as usize;
                let offset = cur.pos;
                let payload = cur.take(len)?;
                match spec.column_type {
                    ColumnType::Timestamp | ColumnType::F64 => {
                        vector::check_fixed(payload, num_rows)
                            .context(BadVectorSnafu { chunk, col })?
                    }
                    ColumnType::Histogram => vector::check_hist(payload, num_rows)
                        .context(BadVectorSnafu { chunk, col })?,
                }
                if col == 0 {
                    // the chunk's declared bounds are the first and last
                    // logical times of its timestamp vector
                    let first = vector::i64_at(payload, 0);
                    let last = vector::i64_at(payload, num_rows as usize - 1);
                    ensure!(
                        first == start_time && last == end_time,
                        TimeBoundsSnafu { chunk }
                    );
                }
                vectors.push((offset, len));
            }

            chunks.push(ChunkInfo {
                start_time,
                end_time,
                num_rows,
                vectors,
            });
        }

        let buf = allocator.alloc_copied(data);
        Ok(Self {
            schema,
            partition_key,
            chunks,
            buf: Some(buf),
        })
    }

    /// The partition key.
    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// The schema id embedded in the partition key.
    pub fn schema_id(&self) -> SchemaId {
        self.schema.id()
    }

    /// The chunk directory, in start-time order.
    pub fn chunk_infos(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    fn vector_data(&self, chunk: &ChunkInfo, col: usize, expected: ColumnType) -> Result<&[u8]> {
        let columns = self.schema.columns();
        ensure!(
            col < columns.len(),
            ColumnOutOfRangeSnafu {
                col,
                columns: columns.len(),
            }
        );
        let found = columns[col].column_type;
        ensure!(
            found == expected,
            WrongColumnTypeSnafu {
                col,
                expected,
                found,
            }
        );
        let data = self.buf.as_deref().context(FreedSnafu)?;
        let (offset, len) = chunk.vectors[col];
        Ok(&data[offset..offset + len])
    }

    /// A timestamp reader over `col` of `chunk`.
    pub fn long_reader(&self, chunk: &ChunkInfo, col: usize) -> Result<LongReader<'_>> {
        let data = self.vector_data(chunk, col, ColumnType::Timestamp)?;
        Ok(LongReader::new(data, chunk.num_rows as usize))
    }

    /// A float reader over `col` of `chunk`.
    pub fn double_reader(&self, chunk: &ChunkInfo, col: usize) -> Result<DoubleReader<'_>> {
        let data = self.vector_data(chunk, col, ColumnType::F64)?;
        Ok(DoubleReader::new(data))
    }

    /// A histogram reader over `col` of `chunk`.
    pub fn hist_reader(&self, chunk: &ChunkInfo, col: usize) -> Result<HistogramReader<'_>> {
        let data = self.vector_data(chunk, col, ColumnType::Histogram)?;
        Ok(HistogramReader::new(data))
    }

    /// Return the paged buffer to the allocator. Idempotent.
    pub fn free(&mut self, allocator: &mut NativeAllocator) {
        if let Some(buf) = self.buf.take() {
            allocator.free(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{RawColumn, RawPartBuilder};
    use schema::ColumnSpec;

    fn gauge_schema() -> Arc<RawSchema> {
        Arc::new(
            RawSchema::new(
                SchemaId::new(1),
                "gauge",
                vec![
                    ColumnSpec::new("timestamp", ColumnType::Timestamp),
                    ColumnSpec::new("value", ColumnType::F64),
                ],
            )
            .unwrap(),
        )
    }

    fn two_chunk_part() -> RawPartData {
        RawPartBuilder::new(SchemaId::new(1), b"series-a")
            .with_chunk(&[100, 200, 300], &[RawColumn::F64(vec![1.0, 2.0, 3.0])])
            .unwrap()
            .with_chunk(&[400, 500], &[RawColumn::F64(vec![4.0, 5.0])])
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn pages_and_reads_chunks() {
        let mut alloc = NativeAllocator::new();
        let part = PagedRawPartition::new(gauge_schema(), &two_chunk_part(), &mut alloc).unwrap();

        assert_eq!(part.schema_id(), SchemaId::new(1));
        let chunks = part.chunk_infos();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_time, 100);
        assert_eq!(chunks[0].end_time, 300);
        assert_eq!(chunks[1].num_rows, 2);

        let ts = part.long_reader(&chunks[0], 0).unwrap();
        assert_eq!(ts.value(2), 300);
        let vals = part.double_reader(&chunks[1], 1).unwrap();
        assert_eq!(vals.value(1), 5.0);
        assert_eq!(alloc.outstanding(), 1);
    }

    #[test]
    fn free_is_idempotent() {
        let mut alloc = NativeAllocator::new();
        let mut part =
            PagedRawPartition::new(gauge_schema(), &two_chunk_part(), &mut alloc).unwrap();

        part.free(&mut alloc);
        part.free(&mut alloc);
        assert_eq!(alloc.outstanding(), 0);

        let chunk = part.chunk_infos()[0].clone();
        assert_matches::assert_matches!(part.long_reader(&chunk, 0), Err(Error::Freed));
    }

    #[test]
    fn rejects_schema_id_mismatch() {
        let other = RawPartBuilder::new(SchemaId::new(9), b"series-a")
            .with_chunk(&[100], &[RawColumn::F64(vec![1.0])])
            .unwrap()
            .build()
            .unwrap();

        let mut alloc = NativeAllocator::new();
        let err = PagedRawPartition::new(gauge_schema(), &other, &mut alloc).unwrap_err();
        assert_matches::assert_matches!(err, Error::SchemaIdMismatch { .. });
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn rejects_truncated_blob() {
        let blob = two_chunk_part();
        let cut = &blob.bytes()[..blob.bytes().len() - 3];

        let mut alloc = NativeAllocator::new();
        let err =
            PagedRawPartition::new(gauge_schema(), &RawPartData::new(cut.to_vec()), &mut alloc)
                .unwrap_err();
        assert_matches::assert_matches!(err, Error::Truncated { .. });
    }

    #[test]
    fn rejects_reader_type_confusion() {
        let mut alloc = NativeAllocator::new();
        let part = PagedRawPartition::new(gauge_schema(), &two_chunk_part(), &mut alloc).unwrap();
        let chunk = part.chunk_infos()[0].clone();

        assert_matches::assert_matches!(
            part.long_reader(&chunk, 1),
            Err(Error::WrongColumnType { col: 1, .. })
        );
        assert_matches::assert_matches!(
            part.double_reader(&chunk, 7),
            Err(Error::ColumnOutOfRange { col: 7, .. })
        );
    }
}

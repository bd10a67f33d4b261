//! In-memory downsample partitions: accept aggregate rows, chunk them
//! through pooled write buffers, and produce flushable chunk sets.

use arena::{BlockFactory, BufferPool, PoolError, WriteBufferSet};
use data_types::{ChunkSet, ColumnValue, PartitionKey, SchemaId};
use observability_deps::tracing::warn;
use schema::DownsampleSchema;
use snafu::{OptionExt, ResultExt, Snafu};
use std::sync::Arc;

/// Errors ingesting aggregate rows.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("cannot buffer aggregate row: {source}"))]
    Push { source: PoolError },

    #[snafu(display("aggregate row does not start with a timestamp cell"))]
    RowNotTimestamp,

    #[snafu(display("partition buffers have been switched for flushing"))]
    Switched,
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A logical time-series partition keyed by the raw partition's key and
/// typed by the downsample schema. Mutated only by [`ingest`] in
/// monotonic timestamp order; torn down by the batch driver once its
/// chunks have been flushed.
///
/// [`ingest`]: DownsamplePartition::ingest
#[derive(Debug)]
pub struct DownsamplePartition {
    schema: Arc<DownsampleSchema>,
    schema_id: SchemaId,
    partition_key: PartitionKey,
    active: Option<WriteBufferSet>,
    frozen: Option<WriteBufferSet>,
    encoded: Vec<ChunkSet>,
    ingestion_time: i64,
    last_row_ts: Option<i64>,
    rows_ingested: u64,
    rows_dropped: u64,
}

impl DownsamplePartition {
    /// Create a partition drawing write buffers from `pool`.
    pub fn new(schema_id: SchemaId, partition_key: PartitionKey, pool: &mut BufferPool) -> Self {
        Self {
            schema: Arc::clone(pool.schema()),
            schema_id,
            partition_key,
            active: Some(pool.checkout()),
            frozen: None,
            encoded: vec![],
            ingestion_time: 0,
            last_row_ts: None,
            rows_ingested: 0,
            rows_dropped: 0,
        }
    }

    /// The raw schema id this partition's buffers are pooled under.
    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    /// The partition key.
    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// Rows accepted so far.
    pub fn rows_ingested(&self) -> u64 {
        self.rows_ingested
    }

    /// Rows dropped for arriving out of timestamp order.
    pub fn rows_dropped(&self) -> u64 {
        self.rows_dropped
    }

    /// Append one aggregate row at its period-end timestamp (cell 0).
    ///
    /// Row timestamps must be strictly increasing; a row at or before
    /// the previous timestamp is dropped and counted, which de-dupes
    /// the period around a chunk boundary that splits it. When the
    /// current write buffers reach the schema's chunk size they are
    /// encoded into an immutable chunk backed by `factory` and the
    /// buffers start over.
    pub fn ingest(
        &mut self,
        factory: &mut BlockFactory,
        ingestion_time: i64,
        row: &[ColumnValue],
    ) -> Result<()> {
        let bufs = self.active.as_mut().context(SwitchedSnafu)?;

        let ts = match row.first() {
            Some(ColumnValue::Timestamp(ts)) => *ts,
            _ => return RowNotTimestampSnafu.fail(),
        };
        if let Some(last) = self.last_row_ts {
            if ts <= last {
                warn!(
                    partition = ?self.partition_key,
                    ts,
                    last,
                    "dropping out-of-order aggregate row"
                );
                self.rows_dropped += 1;
                return Ok(());
            }
        }

        bufs.push_row(row).context(PushSnafu)?;
        self.last_row_ts = Some(ts);
        self.ingestion_time = ingestion_time;
        self.rows_ingested += 1;

        if bufs.num_rows() >= self.schema.rows_per_chunk() {
            let chunk = encode_chunk(factory, &self.partition_key, self.ingestion_time, bufs);
            self.encoded.push(chunk);
            bufs.clear();
        }
        Ok(())
    }

    /// Freeze the current write buffers for flushing. Required before
    /// [`make_flush_chunks`](Self::make_flush_chunks); further ingestion
    /// errors until the flush has produced its chunks.
    pub fn switch_buffers(&mut self) {
        if let Some(active) = self.active.take() {
            self.frozen = Some(active);
        }
    }

    /// Produce the flushable chunk sets: every overflow chunk encoded
    /// during ingestion plus the frozen buffers, encoded now. Once the
    /// iterator exists, all buffered rows have been encoded.
    pub fn make_flush_chunks(&mut self, factory: &mut BlockFactory) -> FlushChunks {
        let mut chunks = std::mem::take(&mut self.encoded);
        if let Some(mut frozen) = self.frozen.take() {
            if !frozen.is_empty() {
                chunks.push(encode_chunk(
                    factory,
                    &self.partition_key,
                    self.ingestion_time,
                    &frozen,
                ));
                frozen.clear();
            }
            self.active = Some(frozen);
        }
        FlushChunks {
            inner: chunks.into_iter(),
        }
    }

    /// Release the write buffers back to `pool` and drop any remaining
    /// chunk references. Idempotent.
    pub fn shutdown(&mut self, pool: &mut BufferPool) {
        if let Some(set) = self.active.take() {
            pool.give_back(set);
        }
        if let Some(set) = self.frozen.take() {
            pool.give_back(set);
        }
        self.encoded.clear();
    }
}

fn encode_chunk(
    factory: &mut BlockFactory,
    partition_key: &PartitionKey,
    ingestion_time: i64,
    bufs: &WriteBufferSet,
) -> ChunkSet {
    let (start_time, end_time) = bufs
        .time_bounds()
        .expect("encoding a non-empty buffer set");

    let mut writer = factory.chunk_writer(bufs.encoded_size());
    for col in bufs.columns() {
        writer.append_vector(|out| col.encode_into(out));
    }

    ChunkSet {
        partition_key: partition_key.clone(),
        start_time,
        end_time,
        ingestion_time,
        num_rows: bufs.num_rows() as u32,
        columns: writer.seal(),
    }
}

/// Pull iterator over a partition's flushable chunk sets.
#[derive(Debug)]
pub struct FlushChunks {
    inner: std::vec::IntoIter<ChunkSet>,
}

impl Iterator for FlushChunks {
    type Item = ChunkSet;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::vector;
    use schema::{ColumnSpec, ColumnType};

    fn pool(rows_per_chunk: usize) -> BufferPool {
        let schema = Arc::new(
            DownsampleSchema::new(
                "gauge_ds",
                vec![
                    ColumnSpec::new("timestamp", ColumnType::Timestamp),
                    ColumnSpec::new("sum", ColumnType::F64),
                ],
                rows_per_chunk,
            )
            .unwrap(),
        );
        BufferPool::new(schema, 2)
    }

    fn row(ts: i64, v: f64) -> Vec<ColumnValue> {
        vec![ColumnValue::Timestamp(ts), ColumnValue::F64(v)]
    }

    fn key() -> PartitionKey {
        PartitionKey::new(&b"\x01\x00\x00\x00series-a"[..])
    }

    #[test]
    fn flushes_buffered_rows_as_one_chunk() {
        let mut pool = pool(100);
        let mut factory = BlockFactory::new(4096);
        let mut p = DownsamplePartition::new(SchemaId::new(1), key(), &mut pool);

        p.ingest(&mut factory, 42, &row(1000, 1.0)).unwrap();
        p.ingest(&mut factory, 42, &row(2000, 2.0)).unwrap();
        p.switch_buffers();

        let chunks: Vec<_> = p.make_flush_chunks(&mut factory).collect();
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert_eq!(c.start_time, 1000);
        assert_eq!(c.end_time, 2000);
        assert_eq!(c.ingestion_time, 42);
        assert_eq!(c.num_rows, 2);
        assert_eq!(vector::i64_at(&c.columns[0], 1), 2000);
        assert_eq!(vector::f64_at(&c.columns[1], 0), 1.0);

        p.shutdown(&mut pool);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn overflowing_buffers_produce_multiple_chunks() {
        let mut pool = pool(2);
        let mut factory = BlockFactory::new(4096);
        let mut p = DownsamplePartition::new(SchemaId::new(1), key(), &mut pool);

        for i in 0..5i64 {
            p.ingest(&mut factory, 0, &row(i * 1000, i as f64)).unwrap();
        }
        p.switch_buffers();

        let chunks: Vec<_> = p.make_flush_chunks(&mut factory).collect();
        assert_eq!(
            chunks.iter().map(|c| c.num_rows).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert_eq!(chunks[1].start_time, 2000);
        assert_eq!(chunks[2].end_time, 4000);
        p.shutdown(&mut pool);
    }

    #[test]
    fn out_of_order_rows_are_dropped_not_fatal() {
        let mut pool = pool(100);
        let mut factory = BlockFactory::new(4096);
        let mut p = DownsamplePartition::new(SchemaId::new(1), key(), &mut pool);

        p.ingest(&mut factory, 0, &row(2000, 1.0)).unwrap();
        p.ingest(&mut factory, 0, &row(2000, 2.0)).unwrap();
        p.ingest(&mut factory, 0, &row(1000, 3.0)).unwrap();
        p.ingest(&mut factory, 0, &row(3000, 4.0)).unwrap();

        assert_eq!(p.rows_ingested(), 2);
        assert_eq!(p.rows_dropped(), 2);
        p.shutdown(&mut pool);
    }

    #[test]
    fn ingest_after_switch_errors() {
        let mut pool = pool(100);
        let mut factory = BlockFactory::new(4096);
        let mut p = DownsamplePartition::new(SchemaId::new(1), key(), &mut pool);

        p.switch_buffers();
        let err = p.ingest(&mut factory, 0, &row(1000, 1.0)).unwrap_err();
        assert_matches::assert_matches!(err, Error::Switched);
        p.shutdown(&mut pool);
    }

    #[test]
    fn empty_partition_flushes_nothing() {
        let mut pool = pool(100);
        let mut factory = BlockFactory::new(4096);
        let mut p = DownsamplePartition::new(SchemaId::new(1), key(), &mut pool);

        p.switch_buffers();
        assert_eq!(p.make_flush_chunks(&mut factory).count(), 0);
        assert_eq!(factory.used_blocks(), 0);
        p.shutdown(&mut pool);
        assert_eq!(pool.outstanding(), 0);
    }
}

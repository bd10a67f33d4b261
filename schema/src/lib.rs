//! Schema definitions for the batch downsampler.
//!
//! A raw schema declares the column layout of ingested partitions and
//! optionally the downsample schema those partitions aggregate into,
//! together with one aggregator descriptor per downsample column. The
//! descriptors are fixed per `(raw schema, downsample schema)` pair and
//! shared across every partition of that schema.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use data_types::SchemaId;
use hashbrown::HashMap;
use snafu::{ensure, Snafu};
use std::sync::Arc;

/// Errors validating schemas and aggregator descriptors.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("schema '{name}' has no columns"))]
    NoColumns { name: String },

    #[snafu(display("schema '{name}' column 0 must be a timestamp, found {found:?}"))]
    FirstColumnNotTimestamp { name: String, found: ColumnType },

    #[snafu(display("schema '{name}' must chunk at least one row"))]
    ZeroRowsPerChunk { name: String },

    #[snafu(display(
        "downsample schema '{name}' has {columns} columns but {aggregators} aggregators"
    ))]
    AggregatorArity {
        name: String,
        columns: usize,
        aggregators: usize,
    },

    #[snafu(display("aggregator {i} references raw column {col}, schema has {columns}"))]
    AggregatorColumnOutOfRange { i: usize, col: usize, columns: usize },

    #[snafu(display(
        "aggregator {i} ({agg}) cannot read raw column {col} of type {found:?}"
    ))]
    AggregatorSourceType {
        i: usize,
        agg: &'static str,
        col: usize,
        found: ColumnType,
    },

    #[snafu(display(
        "aggregator {i} ({agg}) cannot write downsample column of type {found:?}"
    ))]
    AggregatorOutputType {
        i: usize,
        agg: &'static str,
        found: ColumnType,
    },

    #[snafu(display("schema id {id} registered twice"))]
    DuplicateSchema { id: SchemaId },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The type of one column of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Epoch-ms timestamps, strictly increasing within a chunk.
    Timestamp,
    /// 64-bit floats.
    F64,
    /// Serialized bucketed histograms.
    Histogram,
}

/// One named, typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
}

impl ColumnSpec {
    /// Construct a column spec.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// The numeric reduction applied by a `Double` aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DoubleAggKind {
    Min,
    Max,
    Sum,
    Count,
    Avg,
    Last,
}

/// The reduction applied by a `Histogram` aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum HistAggKind {
    Sum,
    Last,
}

/// Describes how one downsample column is computed from a raw chunk's
/// row window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorSpec {
    /// Emits the period end timestamp; `col` is the raw timestamp column.
    Time {
        /// Raw timestamp column index.
        col: usize,
    },
    /// A numeric reduction over a raw `f64` column.
    Double {
        /// The reduction kind.
        kind: DoubleAggKind,
        /// Raw column index.
        col: usize,
    },
    /// A histogram reduction over a raw histogram column.
    Histogram {
        /// The reduction kind.
        kind: HistAggKind,
        /// Raw column index.
        col: usize,
    },
}

impl AggregatorSpec {
    /// The raw column this aggregator reads.
    pub fn source_col(&self) -> usize {
        match self {
            Self::Time { col } | Self::Double { col, .. } | Self::Histogram { col, .. } => *col,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Time { .. } => "time",
            Self::Double { kind, .. } => match kind {
                DoubleAggKind::Min => "min",
                DoubleAggKind::Max => "max",
                DoubleAggKind::Sum => "sum",
                DoubleAggKind::Count => "count",
                DoubleAggKind::Avg => "avg",
                DoubleAggKind::Last => "last",
            },
            Self::Histogram { kind, .. } => match kind {
                HistAggKind::Sum => "hist-sum",
                HistAggKind::Last => "hist-last",
            },
        }
    }
}

/// Per-cell size hint used when estimating encoded histogram vectors.
const HIST_CELL_SIZE_HINT: usize = 64;

/// The schema aggregate rows are ingested and chunked under. Column 0
/// is always the period-end timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownsampleSchema {
    columns: Vec<ColumnSpec>,
    rows_per_chunk: usize,
}

impl DownsampleSchema {
    /// Construct a downsample schema chunking `rows_per_chunk` aggregate
    /// rows per flushed chunk.
    pub fn new(
        name: &str,
        columns: Vec<ColumnSpec>,
        rows_per_chunk: usize,
    ) -> Result<Self> {
        ensure!(!columns.is_empty(), NoColumnsSnafu { name });
        ensure!(
            columns[0].column_type == ColumnType::Timestamp,
            FirstColumnNotTimestampSnafu {
                name,
                found: columns[0].column_type,
            }
        );
        ensure!(rows_per_chunk >= 1, ZeroRowsPerChunkSnafu { name });
        Ok(Self {
            columns,
            rows_per_chunk,
        })
    }

    /// The ordered columns.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Rows accumulated before a write buffer is encoded into a chunk.
    pub fn rows_per_chunk(&self) -> usize {
        self.rows_per_chunk
    }

    /// Declared size of the per-chunk metadata record: time bounds,
    /// ingestion time, row count, and one offset/length pair per column.
    pub fn block_meta_size(&self) -> usize {
        8 + 8 + 8 + 4 + self.columns.len() * 8
    }

    /// Upper estimate of one encoded chunk's vector bytes.
    pub fn max_chunk_bytes_hint(&self) -> usize {
        self.columns
            .iter()
            .map(|c| match c.column_type {
                ColumnType::Timestamp | ColumnType::F64 => self.rows_per_chunk * 8,
                ColumnType::Histogram => self.rows_per_chunk * HIST_CELL_SIZE_HINT,
            })
            .sum()
    }
}

/// A downsample schema together with its aggregator descriptors, one
/// per downsample column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownsampleSpec {
    /// The schema aggregate rows are ingested under.
    pub schema: DownsampleSchema,
    /// One descriptor per downsample column, in column order.
    pub aggregators: Vec<AggregatorSpec>,
}

/// A raw ingestion schema, optionally declaring how its partitions
/// downsample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSchema {
    id: SchemaId,
    name: String,
    columns: Vec<ColumnSpec>,
    downsample: Option<DownsampleSpec>,
}

impl RawSchema {
    /// Construct a raw schema without a downsample declaration.
    pub fn new(id: SchemaId, name: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self> {
        let name = name.into();
        ensure!(!columns.is_empty(), NoColumnsSnafu { name: &name });
        ensure!(
            columns[0].column_type == ColumnType::Timestamp,
            FirstColumnNotTimestampSnafu {
                name: &name,
                found: columns[0].column_type,
            }
        );
        Ok(Self {
            id,
            name,
            columns,
            downsample: None,
        })
    }

    /// Attach a downsample declaration, validating the aggregator list
    /// against both the raw and the downsample columns.
    pub fn with_downsample(mut self, spec: DownsampleSpec) -> Result<Self> {
        let ds_columns = spec.schema.columns();
        ensure!(
            spec.aggregators.len() == ds_columns.len(),
            AggregatorAritySnafu {
                name: &self.name,
                columns: ds_columns.len(),
                aggregators: spec.aggregators.len(),
            }
        );

        for (i, (agg, out)) in spec.aggregators.iter().zip(ds_columns).enumerate() {
            let col = agg.source_col();
            ensure!(
                col < self.columns.len(),
                AggregatorColumnOutOfRangeSnafu {
                    i,
                    col,
                    columns: self.columns.len(),
                }
            );
            let source = self.columns[col].column_type;
            let (want_source, want_out) = match agg {
                AggregatorSpec::Time { .. } => (ColumnType::Timestamp, ColumnType::Timestamp),
                AggregatorSpec::Double { .. } => (ColumnType::F64, ColumnType::F64),
                AggregatorSpec::Histogram { .. } => (ColumnType::Histogram, ColumnType::Histogram),
            };
            ensure!(
                source == want_source,
                AggregatorSourceTypeSnafu {
                    i,
                    agg: agg.name(),
                    col,
                    found: source,
                }
            );
            ensure!(
                out.column_type == want_out,
                AggregatorOutputTypeSnafu {
                    i,
                    agg: agg.name(),
                    found: out.column_type,
                }
            );
        }

        self.downsample = Some(spec);
        Ok(self)
    }

    /// The schema id.
    pub fn id(&self) -> SchemaId {
        self.id
    }

    /// The schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered raw columns.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// The downsample declaration, if any.
    pub fn downsample(&self) -> Option<&DownsampleSpec> {
        self.downsample.as_ref()
    }
}

/// All registered raw schemas, keyed by schema id. Read-only after
/// construction.
#[derive(Debug)]
pub struct SchemaRegistry {
    schemas: HashMap<SchemaId, Arc<RawSchema>>,
}

impl SchemaRegistry {
    /// Build a registry, rejecting duplicate schema ids.
    pub fn new(schemas: impl IntoIterator<Item = RawSchema>) -> Result<Self> {
        let mut map = HashMap::new();
        for schema in schemas {
            let id = schema.id();
            ensure!(
                !map.contains_key(&id),
                DuplicateSchemaSnafu { id }
            );
            map.insert(id, Arc::new(schema));
        }
        Ok(Self { schemas: map })
    }

    /// Look up a schema by id.
    pub fn get(&self, id: SchemaId) -> Option<&Arc<RawSchema>> {
        self.schemas.get(&id)
    }

    /// Iterate all registered schemas.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RawSchema>> {
        self.schemas.values()
    }
}

//! A bucketed histogram value and its serialized form.
//!
//! Histogram cells are stored as opaque payloads inside histogram
//! column vectors. The payload framing is little-endian: a `u16` bucket
//! count, the `f64` upper bucket bounds, then the `u64` bucket counts.

use bytes::{BufMut, Bytes};
use snafu::{ensure, Snafu};

/// Errors constructing, merging, or decoding histograms.
#[derive(Debug, Snafu)]
#[allow(missing_copy_implementations, missing_docs)]
pub enum Error {
    #[snafu(display("histogram declares {bounds} bounds but {counts} counts"))]
    BucketCountMismatch { bounds: usize, counts: usize },

    #[snafu(display("histogram bucket schemes differ ({left} vs {right} buckets)"))]
    BucketSchemeMismatch { left: usize, right: usize },

    #[snafu(display("histogram payload of {len} bytes is truncated"))]
    Truncated { len: usize },

    #[snafu(display("histogram declares {n} buckets, more than the maximum {max}"))]
    TooManyBuckets { n: usize, max: usize },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The maximum number of buckets a histogram payload may declare.
pub const MAX_BUCKETS: usize = u16::MAX as usize;

/// A cumulative bucketed histogram: `counts[i]` observations at or
/// below `le_bounds[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    le_bounds: Vec<f64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Construct a histogram; bounds and counts must pair up.
    pub fn new(le_bounds: Vec<f64>, counts: Vec<u64>) -> Result<Self> {
        ensure!(
            le_bounds.len() == counts.len(),
            BucketCountMismatchSnafu {
                bounds: le_bounds.len(),
                counts: counts.len(),
            }
        );
        ensure!(
            le_bounds.len() <= MAX_BUCKETS,
            TooManyBucketsSnafu {
                n: le_bounds.len(),
                max: MAX_BUCKETS,
            }
        );
        Ok(Self { le_bounds, counts })
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.counts.len()
    }

    /// The upper bucket bounds.
    pub fn le_bounds(&self) -> &[f64] {
        &self.le_bounds
    }

    /// The per-bucket observation counts.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Bucket-wise accumulate `other` into `self` without
    /// reallocating. Both must declare the same bucket scheme.
    pub fn checked_add_assign(&mut self, other: &Self) -> Result<()> {
        ensure!(
            self.le_bounds == other.le_bounds,
            BucketSchemeMismatchSnafu {
                left: self.bucket_count(),
                right: other.bucket_count(),
            }
        );
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a = a.wrapping_add(*b);
        }
        Ok(())
    }

    /// Bucket-wise sum of two histograms. Both must declare the same
    /// bucket scheme.
    pub fn checked_add(&self, other: &Self) -> Result<Self> {
        let mut sum = self.clone();
        sum.checked_add_assign(other)?;
        Ok(sum)
    }

    /// The serialized size of this histogram in bytes.
    pub fn encoded_len(&self) -> usize {
        2 + self.bucket_count() * 16
    }

    /// Serialize into `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.put_u16_le(self.bucket_count() as u16);
        for b in &self.le_bounds {
            out.put_f64_le(*b);
        }
        for c in &self.counts {
            out.put_u64_le(*c);
        }
    }

    /// Serialize to an owned payload.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out.into()
    }

    /// Decode a serialized histogram payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure!(data.len() >= 2, TruncatedSnafu { len: data.len() });
        let n = u16::from_le_bytes([data[0], data[1]]) as usize;
        ensure!(
            data.len() == 2 + n * 16,
            TruncatedSnafu { len: data.len() }
        );

        let mut le_bounds = Vec::with_capacity(n);
        let mut counts = Vec::with_capacity(n);
        let bounds_start = 2;
        let counts_start = bounds_start + n * 8;
        for i in 0..n {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[bounds_start + i * 8..bounds_start + (i + 1) * 8]);
            le_bounds.push(f64::from_le_bytes(buf));
            buf.copy_from_slice(&data[counts_start + i * 8..counts_start + (i + 1) * 8]);
            counts.push(u64::from_le_bytes(buf));
        }
        Ok(Self { le_bounds, counts })
    }
}

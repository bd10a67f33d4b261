//! Typed readers over canonical column vectors.

use data_types::{histogram, vector, Histogram};

/// Reads an `i64` timestamp vector, with the binary searches the window
/// downsampler locates row-range boundaries with.
#[derive(Debug, Clone, Copy)]
pub struct LongReader<'a> {
    data: &'a [u8],
    num_rows: usize,
}

impl<'a> LongReader<'a> {
    pub(crate) fn new(data: &'a [u8], num_rows: usize) -> Self {
        Self { data, num_rows }
    }

    /// The value at row `i`.
    pub fn value(&self, i: usize) -> i64 {
        vector::i64_at(self.data, i)
    }

    /// Index of the first row with value `>= target`; `num_rows` if no
    /// such row exists. O(log n).
    pub fn lower_bound(&self, target: i64) -> usize {
        let mut lo = 0;
        let mut hi = self.num_rows;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.value(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Index of the last row with value `<= target`, if any. O(log n).
    ///
    /// Note this is the *right* boundary of a window: a classic
    /// first-at-or-above search here would misattribute a sample lying
    /// exactly on the boundary.
    pub fn last_at_or_before(&self, target: i64) -> Option<usize> {
        let mut lo = 0;
        let mut hi = self.num_rows;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.value(mid) <= target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo.checked_sub(1)
    }
}

/// Reads an `f64` vector.
#[derive(Debug, Clone, Copy)]
pub struct DoubleReader<'a> {
    data: &'a [u8],
}

impl<'a> DoubleReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// The value at row `i`.
    pub fn value(&self, i: usize) -> f64 {
        vector::f64_at(self.data, i)
    }
}

/// Reads a histogram vector.
#[derive(Debug, Clone, Copy)]
pub struct HistogramReader<'a> {
    data: &'a [u8],
}

impl<'a> HistogramReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// The serialized payload at row `i`.
    pub fn slice(&self, i: usize) -> &'a [u8] {
        vector::hist_slice(self.data, i)
    }

    /// The decoded histogram at row `i`.
    pub fn histogram(&self, i: usize) -> Result<Histogram, histogram::Error> {
        Histogram::decode(self.slice(i))
    }
}

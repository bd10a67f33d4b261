//! The canonical columnar vector layout shared by the raw store and the
//! downsample output.
//!
//! Fixed-width vectors (timestamps, floats) are headerless runs of
//! 8-byte little-endian values; the row count travels in the chunk
//! directory. Histogram vectors are variable-width: a `u32` row count,
//! `rows + 1` `u32` payload offsets, then the concatenated payloads.
//!
//! Encoding and decoding go through the helpers here on both the read
//! and the write path, which is what makes re-running a batch over
//! unchanged input produce bit-identical chunks.

use bytes::BufMut;
use snafu::{ensure, Snafu};

/// Errors validating vector payloads against the chunk directory.
#[derive(Debug, Snafu)]
#[allow(missing_copy_implementations, missing_docs)]
pub enum Error {
    #[snafu(display("fixed-width vector of {actual} bytes, expected {expected}"))]
    FixedLengthMismatch { expected: usize, actual: usize },

    #[snafu(display("histogram vector of {len} bytes is truncated"))]
    HistTruncated { len: usize },

    #[snafu(display("histogram vector declares {actual} rows, expected {expected}"))]
    HistRowCount { expected: u32, actual: u32 },

    #[snafu(display("histogram vector offsets are not monotonic at row {row}"))]
    HistOffsets { row: usize },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Width in bytes of one fixed-width cell.
pub const FIXED_WIDTH: usize = 8;

/// Append a run of `i64` values in the canonical layout.
pub fn encode_i64s(values: &[i64], out: &mut Vec<u8>) {
    out.reserve(values.len() * FIXED_WIDTH);
    for v in values {
        out.put_i64_le(*v);
    }
}

/// Append a run of `f64` values in the canonical layout.
pub fn encode_f64s(values: &[f64], out: &mut Vec<u8>) {
    out.reserve(values.len() * FIXED_WIDTH);
    for v in values {
        out.put_f64_le(*v);
    }
}

/// Append a histogram vector assembled from `rows + 1` payload offsets
/// and the concatenated payload bytes.
pub fn encode_hist_vector(offsets: &[u32], payload: &[u8], out: &mut Vec<u8>) {
    debug_assert!(!offsets.is_empty());
    let rows = offsets.len() - 1;
    out.reserve(4 + offsets.len() * 4 + payload.len());
    out.put_u32_le(rows as u32);
    for o in offsets {
        out.put_u32_le(*o);
    }
    out.put_slice(payload);
}

/// Read the `i`th cell of a fixed-width `i64` vector.
///
/// Callers must have validated the payload with [`check_fixed`].
pub fn i64_at(data: &[u8], i: usize) -> i64 {
    let mut buf = [0u8; FIXED_WIDTH];
    buf.copy_from_slice(&data[i * FIXED_WIDTH..(i + 1) * FIXED_WIDTH]);
    i64::from_le_bytes(buf)
}

/// Read the `i`th cell of a fixed-width `f64` vector.
///
/// Callers must have validated the payload with [`check_fixed`].
pub fn f64_at(data: &[u8], i: usize) -> f64 {
    let mut buf = [0u8; FIXED_WIDTH];
    buf.copy_from_slice(&data[i * FIXED_WIDTH..(i + 1) * FIXED_WIDTH]);
    f64::from_le_bytes(buf)
}

/// Validate a fixed-width vector payload against the declared row count.
pub fn check_fixed(data: &[u8], num_rows: u32) -> Result<()> {
    let expected = num_rows as usize * FIXED_WIDTH;
    ensure!(
        data.len() == expected,
        FixedLengthMismatchSnafu {
            expected,
            actual: data.len(),
        }
    );
    Ok(())
}

/// Validate a histogram vector payload against the declared row count.
pub fn check_hist(data: &[u8], num_rows: u32) -> Result<()> {
    ensure!(data.len() >= 4, HistTruncatedSnafu { len: data.len() });
    let rows = u32_at(data, 0);
    ensure!(
        rows == num_rows,
        HistRowCountSnafu {
            expected: num_rows,
            actual: rows,
        }
    );

    let offsets_end = 4 + (rows as usize + 1) * 4;
    ensure!(
        data.len() >= offsets_end,
        HistTruncatedSnafu { len: data.len() }
    );

    let payload_len = data.len() - offsets_end;
    let mut prev = 0u32;
    for i in 0..=rows as usize {
        let o = u32_at(data, 4 + i * 4);
        ensure!(o >= prev, HistOffsetsSnafu { row: i });
        prev = o;
    }
    ensure!(
        prev as usize == payload_len,
        HistTruncatedSnafu { len: data.len() }
    );
    Ok(())
}

/// The serialized payload of the `i`th histogram in a histogram vector.
///
/// Callers must have validated the payload with [`check_hist`].
pub fn hist_slice(data: &[u8], i: usize) -> &[u8] {
    let rows = u32_at(data, 0) as usize;
    let start = u32_at(data, 4 + i * 4) as usize;
    let end = u32_at(data, 4 + (i + 1) * 4) as usize;
    let payload = &data[4 + (rows + 1) * 4..];
    &payload[start..end]
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Histogram;

    #[test]
    fn fixed_width_round_trip() {
        let mut out = vec![];
        encode_i64s(&[1, -5, i64::MAX], &mut out);
        check_fixed(&out, 3).unwrap();
        assert_eq!(i64_at(&out, 0), 1);
        assert_eq!(i64_at(&out, 1), -5);
        assert_eq!(i64_at(&out, 2), i64::MAX);

        let mut out = vec![];
        encode_f64s(&[0.5, f64::NAN], &mut out);
        check_fixed(&out, 2).unwrap();
        assert_eq!(f64_at(&out, 0), 0.5);
        assert!(f64_at(&out, 1).is_nan());
    }

    #[test]
    fn fixed_width_length_mismatch() {
        let mut out = vec![];
        encode_i64s(&[1, 2], &mut out);
        assert!(matches!(
            check_fixed(&out, 3).unwrap_err(),
            Error::FixedLengthMismatch { .. }
        ));
    }

    #[test]
    fn hist_vector_round_trip() {
        let h1 = Histogram::new(vec![1.0, 2.0], vec![3, 4]).unwrap();
        let h2 = Histogram::new(vec![1.0, 2.0], vec![5, 6]).unwrap();

        let mut payload = vec![];
        let mut offsets = vec![0u32];
        for h in [&h1, &h2] {
            h.encode_into(&mut payload);
            offsets.push(payload.len() as u32);
        }

        let mut out = vec![];
        encode_hist_vector(&offsets, &payload, &mut out);
        check_hist(&out, 2).unwrap();

        assert_eq!(Histogram::decode(hist_slice(&out, 0)).unwrap(), h1);
        assert_eq!(Histogram::decode(hist_slice(&out, 1)).unwrap(), h2);
    }

    #[test]
    fn hist_vector_truncated() {
        let mut out = vec![];
        encode_hist_vector(&[0, 4], &[1, 2, 3, 4], &mut out);
        out.pop();
        assert!(check_hist(&out, 1).is_err());
    }

    #[test]
    fn hist_vector_row_count_mismatch() {
        let mut out = vec![];
        encode_hist_vector(&[0, 0], &[], &mut out);
        assert!(matches!(
            check_hist(&out, 2).unwrap_err(),
            Error::HistRowCount { .. }
        ));
    }
}

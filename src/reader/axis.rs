use std::fmt;

use rayon::prelude::*;

use crate::matrix::{MatrixHandle, OpenMatrix, SparseMatrixType};
use crate::utils::zero_line;
use crate::Direction;

use super::ReaderConfig;

/// Line counts along the primary and secondary axis of a loaded matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub primary: usize,
    pub secondary: usize,
}

type LineFn = fn(&MatrixHandle, Extent, usize, &ReaderConfig) -> Vec<f32>;

/// Binds rows and columns to the primary (sliced) or secondary (scanned) read path.
///
/// CSR reads rows on the primary path and columns on the secondary path, CSC the
/// other way around. The binding is fixed at construction.
#[derive(Clone, Copy)]
pub struct AxisReader {
    primary: Direction,
    row: LineFn,
    column: LineFn,
}

impl fmt::Debug for AxisReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxisReader")
            .field("primary", &self.primary)
            .finish()
    }
}

impl AxisReader {
    pub fn csr() -> Self {
        Self {
            primary: Direction::ROW,
            row: primary_line,
            column: secondary_line,
        }
    }

    pub fn csc() -> Self {
        Self {
            primary: Direction::COLUMN,
            row: secondary_line,
            column: primary_line,
        }
    }

    pub fn for_type(matrix_type: SparseMatrixType) -> Option<Self> {
        match matrix_type {
            SparseMatrixType::CSR => Some(Self::csr()),
            SparseMatrixType::CSC => Some(Self::csc()),
            SparseMatrixType::UNKNOWN => None,
        }
    }

    pub fn primary_axis(&self) -> Direction {
        self.primary
    }

    /// The layout this binding reads.
    pub fn layout(&self) -> SparseMatrixType {
        match self.primary {
            Direction::ROW => SparseMatrixType::CSR,
            Direction::COLUMN => SparseMatrixType::CSC,
        }
    }

    pub fn extent(&self, handle: &MatrixHandle) -> Extent {
        match self.primary {
            Direction::ROW => Extent {
                primary: handle.num_rows(),
                secondary: handle.num_cols(),
            },
            Direction::COLUMN => Extent {
                primary: handle.num_cols(),
                secondary: handle.num_rows(),
            },
        }
    }

    pub fn read_row(&self, handle: &MatrixHandle, row: usize, config: &ReaderConfig) -> Vec<f32> {
        (self.row)(handle, self.extent(handle), row, config)
    }

    pub fn read_column(
        &self,
        handle: &MatrixHandle,
        column: usize,
        config: &ReaderConfig,
    ) -> Vec<f32> {
        (self.column)(handle, self.extent(handle), column, config)
    }

    /// Reads along the compressed axis: O(nnz of the line).
    pub fn read_primary_line(
        &self,
        handle: &MatrixHandle,
        idx: usize,
        config: &ReaderConfig,
    ) -> Vec<f32> {
        primary_line(handle, self.extent(handle), idx, config)
    }

    /// Reads across the compressed axis: O(total nnz).
    pub fn read_secondary_line(
        &self,
        handle: &MatrixHandle,
        idx: usize,
        config: &ReaderConfig,
    ) -> Vec<f32> {
        secondary_line(handle, self.extent(handle), idx, config)
    }
}

/// Dense primary line `idx`, of length `extent.secondary`.
///
/// An out-of-range index or an unopened matrix yields all zeros. A failed slice read
/// is logged and also yields zeros.
fn primary_line(
    handle: &MatrixHandle,
    extent: Extent,
    idx: usize,
    config: &ReaderConfig,
) -> Vec<f32> {
    let mut dense = zero_line(extent.secondary);

    let open = match handle.datasets() {
        Some(open) => open,
        None => return dense,
    };
    if idx >= extent.primary {
        log::trace!("primary line {} out of range 0..{}", idx, extent.primary);
        return dense;
    }
    let (start, end) = match handle.line_range(idx) {
        Some(range) => range,
        None => return dense,
    };
    let nnz = end - start;
    if nnz == 0 {
        return dense;
    }

    match read_line_values(open, start, nnz) {
        Ok((indices, values)) => {
            let skipped = scatter(&mut dense, &indices, &values, config.parallel_threshold);
            if skipped > 0 {
                log::warn!(
                    "primary line {}: skipped {} stored indices outside 0..{}",
                    idx,
                    skipped,
                    extent.secondary
                );
            }
        }
        Err(e) => log::error!("error reading primary line {}: {:#}", idx, e),
    }
    dense
}

fn read_line_values(
    open: &OpenMatrix,
    start: usize,
    nnz: usize,
) -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
    let values = open.container.read_slice(&open.data, start, nnz)?;
    let indices = open.container.read_slice(&open.indices, start, nnz)?;
    Ok((indices, values))
}

/// Writes `values[k]` to `dense[indices[k]]`, returning how many indices were out of range.
///
/// Indices within one line are distinct, so above `parallel_threshold` pairs the
/// writes are bucketed by output chunk and applied on the rayon pool.
fn scatter(
    dense: &mut [f32],
    indices: &[usize],
    values: &[f32],
    parallel_threshold: usize,
) -> usize {
    let len = dense.len();
    let mut skipped = 0;

    if indices.len() < parallel_threshold {
        for (&i, &v) in indices.iter().zip(values.iter()) {
            match dense.get_mut(i) {
                Some(slot) => *slot = v,
                None => skipped += 1,
            }
        }
        return skipped;
    }

    let chunk_len = len.div_ceil(rayon::current_num_threads().max(1)).max(1);
    let mut buckets: Vec<Vec<(usize, f32)>> = vec![Vec::new(); len.div_ceil(chunk_len)];
    for (&i, &v) in indices.iter().zip(values.iter()) {
        if i < len {
            buckets[i / chunk_len].push((i % chunk_len, v));
        } else {
            skipped += 1;
        }
    }

    dense
        .par_chunks_mut(chunk_len)
        .zip(buckets.par_iter())
        .for_each(|(chunk, bucket)| {
            for &(offset, v) in bucket {
                chunk[offset] = v;
            }
        });
    skipped
}

/// Dense secondary line `idx`, of length `extent.primary`.
///
/// Scans the `indices` run of every primary line for `idx` and reads the single
/// matching value. On a read failure the lines found so far are kept.
fn secondary_line(
    handle: &MatrixHandle,
    extent: Extent,
    idx: usize,
    _config: &ReaderConfig,
) -> Vec<f32> {
    let mut dense = zero_line(extent.primary);

    let open = match handle.datasets() {
        Some(open) => open,
        None => return dense,
    };
    if idx >= extent.secondary {
        log::trace!("secondary line {} out of range 0..{}", idx, extent.secondary);
        return dense;
    }

    if let Err(e) = scan_secondary(handle, open, idx, &mut dense) {
        log::error!("error reading secondary line {}: {:#}", idx, e);
    }
    dense
}

fn scan_secondary(
    handle: &MatrixHandle,
    open: &OpenMatrix,
    idx: usize,
    dense: &mut [f32],
) -> anyhow::Result<()> {
    let mut line_indices: Vec<usize> = Vec::new();

    for (line, slot) in dense.iter_mut().enumerate() {
        let (start, end) = match handle.line_range(line) {
            Some(range) => range,
            None => break,
        };
        if start == end {
            continue;
        }

        open.container
            .read_slice_into(&open.indices, start, end - start, &mut line_indices)?;

        // at most one match, indices within a line are distinct
        if let Some(k) = line_indices.iter().position(|&i| i == idx) {
            let value: Vec<f32> = open.container.read_slice(&open.data, start + k, 1)?;
            if let Some(&v) = value.first() {
                *slot = v;
            }
        }
    }
    Ok(())
}

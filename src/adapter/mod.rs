//! Helpers for consumers that present a loaded matrix as points × dimensions:
//! every row is a point and the selected columns are its dimensions.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Context};
use ndarray::{Array2, Axis};
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

use crate::reader::SparseMatrixReader;

/// Columns shown before the user picks any: the first two when at least two
/// variables are named, otherwise the first. Empty when nothing is loaded.
pub fn initial_dimensions(reader: &SparseMatrixReader) -> Vec<usize> {
    if !reader.is_open() || reader.num_cols() == 0 {
        return Vec::new();
    }
    if reader.var_names().len() >= 2 {
        vec![0, 1]
    } else {
        vec![0]
    }
}

/// Reads the selected columns into a `num_rows × columns.len()` array, one
/// column of the result per selected column, in selection order.
pub fn read_columns(
    reader: &mut SparseMatrixReader,
    columns: &[usize],
) -> anyhow::Result<Array2<f32>> {
    if !reader.is_open() {
        bail!("no matrix loaded");
    }
    let num_rows = reader.num_rows();
    let num_cols = reader.num_cols();
    if let Some(&bad) = columns.iter().find(|&&c| c >= num_cols) {
        bail!("column {} out of range for a matrix with {} columns", bad, num_cols);
    }

    let fetched: Vec<Vec<f32>> = columns.iter().map(|&c| reader.get_column(c)).collect();
    if let Some((k, _)) = fetched.iter().enumerate().find(|(_, v)| v.len() != num_rows) {
        bail!(
            "column {} has {} values, expected {}",
            columns[k],
            fetched[k].len(),
            num_rows
        );
    }

    let mut points = Array2::<f32>::zeros((num_rows, columns.len()));
    points
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(r, mut point)| {
            for (k, column) in fetched.iter().enumerate() {
                point[k] = column[r];
            }
        });

    log::debug!(
        "interleaved {} columns into {} points",
        columns.len(),
        num_rows
    );
    Ok(points)
}

/// Display names of the selected columns; the column index when unnamed.
pub fn dimension_names(reader: &SparseMatrixReader, columns: &[usize]) -> Vec<String> {
    let names = reader.var_names();
    columns
        .iter()
        .map(|&c| names.get(c).cloned().unwrap_or_else(|| c.to_string()))
        .collect()
}

/// A reader shared between a consumer and its worker threads.
///
/// Access is serialized by a mutex; the reader itself is single-threaded.
#[derive(Debug, Clone)]
pub struct SharedReader {
    inner: Arc<Mutex<SparseMatrixReader>>,
}

impl SharedReader {
    pub fn new(reader: SparseMatrixReader) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SparseMatrixReader> {
        self.inner.lock()
    }

    pub fn read_columns(&self, columns: &[usize]) -> anyhow::Result<Array2<f32>> {
        read_columns(&mut self.inner.lock(), columns)
    }

    /// Reads the selected columns on a new thread.
    pub fn spawn_read_columns(
        &self,
        columns: Vec<usize>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<Array2<f32>>>> {
        let shared = self.clone();
        std::thread::Builder::new()
            .name("sparse-column-reader".to_owned())
            .spawn(move || shared.read_columns(&columns))
            .context("failed to spawn column reader thread")
    }

    /// Unwraps the reader if no other handle remains.
    pub fn try_into_inner(self) -> Result<SparseMatrixReader, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{write_reference, ReferenceLayout, REFERENCE_DENSE};
    use approx::assert_abs_diff_eq;

    fn reference_reader(layout: ReferenceLayout) -> (tempfile::TempDir, SparseMatrixReader) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_reference(dir.path(), layout);
        let reader = SparseMatrixReader::open(path).unwrap();
        (dir, reader)
    }

    #[test]
    fn test_initial_dimensions() {
        let (_dir, reader) = reference_reader(ReferenceLayout::Csr);
        assert_eq!(initial_dimensions(&reader), vec![0, 1]);
        assert!(initial_dimensions(&SparseMatrixReader::csr()).is_empty());
    }

    #[test]
    fn test_initial_dimensions_without_names() {
        let (coo, _) = crate::test_utils::random_matrix(3, 3, 0.5, 1);
        let dir = tempfile::tempdir().unwrap();
        let path = crate::test_utils::write_random(dir.path(), ReferenceLayout::Csr, &coo);
        let reader = SparseMatrixReader::open(path).unwrap();
        assert_eq!(initial_dimensions(&reader), vec![0]);
        assert_eq!(dimension_names(&reader, &[2, 0]), vec!["2", "0"]);
    }

    #[test]
    fn test_read_columns_interleaves() {
        for layout in [ReferenceLayout::Csr, ReferenceLayout::Csc] {
            let (_dir, mut reader) = reference_reader(layout);
            let points = read_columns(&mut reader, &[3, 0, 2]).unwrap();

            assert_eq!(points.dim(), (5, 3));
            for r in 0..5 {
                assert_abs_diff_eq!(points[[r, 0]], REFERENCE_DENSE[r][3]);
                assert_abs_diff_eq!(points[[r, 1]], REFERENCE_DENSE[r][0]);
                assert_abs_diff_eq!(points[[r, 2]], REFERENCE_DENSE[r][2]);
            }
            assert_eq!(reader.cached_columns(), vec![2, 0, 3]);
        }
    }

    #[test]
    fn test_read_columns_errors() {
        let (_dir, mut reader) = reference_reader(ReferenceLayout::Csr);
        assert!(read_columns(&mut reader, &[0, 4]).is_err());
        assert!(read_columns(&mut SparseMatrixReader::csc(), &[0]).is_err());

        let empty = read_columns(&mut reader, &[]).unwrap();
        assert_eq!(empty.dim(), (5, 0));
    }

    #[test]
    fn test_dimension_names() {
        let (_dir, reader) = reference_reader(ReferenceLayout::Csc);
        assert_eq!(dimension_names(&reader, &[1, 3]), vec!["var1", "var3"]);
    }

    #[test]
    fn test_shared_reader_background_fetch() {
        let (_dir, reader) = reference_reader(ReferenceLayout::Csc);
        let shared = SharedReader::new(reader);

        let handle = shared.spawn_read_columns(vec![1, 3]).unwrap();
        let points = handle.join().unwrap().unwrap();
        assert_eq!(points.column(0).to_vec(), vec![10.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(points.column(1).to_vec(), vec![0.0, 0.0, 70.0, 40.6, 60.0]);

        assert_eq!(shared.lock().cached_columns(), vec![3, 1]);
        let reader = shared.try_into_inner().unwrap();
        assert_eq!(reader.num_rows(), 5);
    }
}

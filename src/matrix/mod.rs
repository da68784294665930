//! # Sparse Matrix Model
//!
//! [`MatrixHandle`] holds everything a line read needs from an open container: the
//! container itself, handles to `data`/`indices`/`indptr`, the matrix shape, the
//! eagerly decoded `indptr` and the optional name tables. `data` and `indices` are
//! only ever sliced.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};

use crate::store::{DType, Dataset, H5Container};
use crate::Direction;

/// Storage layout of a compressed sparse matrix, as declared by the `format` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SparseMatrixType {
    /// Compressed sparse rows: rows are the primary axis.
    CSR,
    /// Compressed sparse columns: columns are the primary axis.
    CSC,
    #[default]
    UNKNOWN,
}

impl SparseMatrixType {
    /// Maps a `format` attribute value, case-insensitively. Anything unrecognized is `UNKNOWN`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_uppercase().as_str() {
            "CSR" => SparseMatrixType::CSR,
            "CSC" => SparseMatrixType::CSC,
            _ => SparseMatrixType::UNKNOWN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SparseMatrixType::CSR => "CSR",
            SparseMatrixType::CSC => "CSC",
            SparseMatrixType::UNKNOWN => "UNKNOWN",
        }
    }

    /// The axis along which this layout is compressed.
    pub fn primary_axis(&self) -> Option<Direction> {
        match self {
            SparseMatrixType::CSR => Some(Direction::ROW),
            SparseMatrixType::CSC => Some(Direction::COLUMN),
            SparseMatrixType::UNKNOWN => None,
        }
    }
}

impl fmt::Display for SparseMatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads the `format` attribute of a container without loading the matrix.
///
/// An unreadable file or a missing/unrecognized attribute yields `UNKNOWN`.
pub fn read_matrix_type(path: impl AsRef<Path>) -> SparseMatrixType {
    let path = path.as_ref();
    match H5Container::open(path) {
        Ok(container) => SparseMatrixType::from_tag(&container.read_attribute_string("format")),
        Err(e) => {
            log::error!("cannot detect matrix type of {}: {:#}", path.display(), e);
            SparseMatrixType::UNKNOWN
        }
    }
}

/// The open backing datasets. Present as a whole or not at all.
#[derive(Debug)]
pub(crate) struct OpenMatrix {
    pub container: H5Container,
    pub data: Dataset,
    pub indices: Dataset,
    pub indptr: Dataset,
}

/// An open (or reset) compressed sparse matrix.
#[derive(Debug, Default)]
pub struct MatrixHandle {
    path: Option<PathBuf>,
    open: Option<OpenMatrix>,
    num_rows: usize,
    num_cols: usize,
    indptr: Vec<usize>,
    obs_names: Vec<String>,
    var_names: Vec<String>,
}

impl MatrixHandle {
    /// Loads the matrix at `path`, compressed along `primary`.
    ///
    /// Shape, dataset handles, `indptr` and name tables are validated and assembled
    /// before anything is returned, so a failure never leaves a half-loaded handle.
    pub fn load(path: impl AsRef<Path>, primary: Direction) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let container = H5Container::open(path)?;

        let (num_rows, num_cols) = container.read_shape()?;
        let data = container.dataset("data")?;
        let indices = container.dataset("indices")?;
        let indptr_ds = container.dataset("indptr")?;

        let indptr: Vec<usize> = container
            .read_full_array(&indptr_ds)
            .with_context(|| format!("failed to read '{}'", indptr_ds.name()))?;

        let num_primary = match primary {
            Direction::ROW => num_rows,
            Direction::COLUMN => num_cols,
        };
        validate_indptr(&indptr, num_primary, data.len(), indices.len())
            .with_context(|| format!("invalid '{}' in {}", indptr_ds.name(), path.display()))?;

        let obs_names = read_names(&container, "obs_names", num_rows);
        let var_names = read_names(&container, "var_names", num_cols);

        log::debug!(
            "loaded {} x {} matrix with {} stored values from {}",
            num_rows,
            num_cols,
            indptr.last().copied().unwrap_or(0),
            path.display()
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            open: Some(OpenMatrix {
                container,
                data,
                indices,
                indptr: indptr_ds,
            }),
            num_rows,
            num_cols,
            indptr,
            obs_names,
            var_names,
        })
    }

    /// Drops all handles and tables, returning to the empty state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Number of stored values.
    pub fn nnz(&self) -> usize {
        self.indptr.last().copied().unwrap_or(0)
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    /// Value range `[start, end)` of primary line `idx`, if it exists.
    pub fn line_range(&self, idx: usize) -> Option<(usize, usize)> {
        let start = *self.indptr.get(idx)?;
        let end = *self.indptr.get(idx + 1)?;
        Some((start, end))
    }

    pub fn obs_names(&self) -> &[String] {
        &self.obs_names
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    /// Stored element types of `data`, `indices` and `indptr`.
    pub fn dtypes(&self) -> Option<(DType, DType, DType)> {
        self.open
            .as_ref()
            .map(|m| (m.data.dtype(), m.indices.dtype(), m.indptr.dtype()))
    }

    pub(crate) fn datasets(&self) -> Option<&OpenMatrix> {
        self.open.as_ref()
    }
}

fn validate_indptr(
    indptr: &[usize],
    num_primary: usize,
    data_len: usize,
    indices_len: usize,
) -> anyhow::Result<()> {
    if indptr.len() != num_primary + 1 {
        bail!(
            "indptr has {} entries, expected {} for {} primary lines",
            indptr.len(),
            num_primary + 1,
            num_primary
        );
    }
    if indptr[0] != 0 {
        bail!("indptr must start at 0, found {}", indptr[0]);
    }
    if let Some(i) = indptr.windows(2).position(|w| w[0] > w[1]) {
        bail!(
            "indptr decreases at line {} ({} > {})",
            i,
            indptr[i],
            indptr[i + 1]
        );
    }
    let nnz = indptr[num_primary];
    if nnz > data_len || nnz > indices_len {
        return Err(anyhow!(
            "indptr addresses {} values but data has {} and indices {}",
            nnz,
            data_len,
            indices_len
        ));
    }
    Ok(())
}

fn read_names(container: &H5Container, name: &str, expected: usize) -> Vec<String> {
    match container.read_optional_string_array(name) {
        Ok(names) if names.is_empty() || names.len() == expected => names,
        Ok(names) => {
            log::warn!(
                "ignoring '{}': {} entries for {} lines",
                name,
                names.len(),
                expected
            );
            Vec::new()
        }
        Err(e) => {
            log::warn!("ignoring '{}': {:#}", name, e);
            Vec::new()
        }
    }
}

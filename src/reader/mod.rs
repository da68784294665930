//! # Sparse Matrix Reader
//!
//! [`SparseMatrixReader`] opens a CSR or CSC container and serves rows and columns
//! as dense `f32` vectors. Reads along the compressed axis slice only the values of
//! the requested line; reads across it scan every line's indices. Each axis keeps
//! its own LRU cache of recently materialized lines.
//!
//! ```no_run
//! use single_sparse_access::SparseMatrixReader;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut reader = SparseMatrixReader::open("counts.sph5")?;
//! let row = reader.get_row(0);
//! let column = reader.get_column(3);
//! assert_eq!(row.len(), reader.num_cols());
//! assert_eq!(column.len(), reader.num_rows());
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use anyhow::bail;

use crate::cache::LruCache;
use crate::matrix::{MatrixHandle, SparseMatrixType};
use crate::Direction;

mod axis;

pub use axis::{AxisReader, Extent};

pub const DEFAULT_MAX_CACHE_SIZE: usize = 10;

/// Stored values per line above which a primary read scatters on the rayon pool.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// Settings a reader starts with and returns to on [`SparseMatrixReader::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    pub max_cache_size: usize,
    pub use_cache: bool,
    pub parallel_threshold: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            use_cache: true,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

pub struct SparseMatrixReaderBuilder {
    layout: SparseMatrixType,
    config: ReaderConfig,
}

impl Default for SparseMatrixReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseMatrixReaderBuilder {
    pub fn new() -> Self {
        Self {
            layout: SparseMatrixType::CSR,
            config: ReaderConfig::default(),
        }
    }

    pub fn layout(mut self, layout: SparseMatrixType) -> Self {
        self.layout = layout;
        self
    }

    pub fn max_cache_size(mut self, max_cache_size: usize) -> Self {
        self.config.max_cache_size = max_cache_size;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.config.use_cache = use_cache;
        self
    }

    pub fn parallel_threshold(mut self, parallel_threshold: usize) -> Self {
        self.config.parallel_threshold = parallel_threshold;
        self
    }

    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<SparseMatrixReader> {
        let axes = match AxisReader::for_type(self.layout) {
            Some(axes) => axes,
            None => bail!("cannot build a reader for layout {}", self.layout),
        };
        Ok(SparseMatrixReader::with_axes(axes, self.config))
    }
}

/// Row and column access to one on-disk compressed sparse matrix.
///
/// A reader is bound to CSR or CSC at construction and holds at most one open
/// file. Line reads never fail: an out-of-range index, an unopened reader or an
/// I/O error all produce a zero-filled vector of the right length, with the cause
/// logged.
#[derive(Debug)]
pub struct SparseMatrixReader {
    axes: AxisReader,
    matrix_type: SparseMatrixType,
    config: ReaderConfig,
    handle: MatrixHandle,
    use_cache: bool,
    max_cache_size: usize,
    rows: LruCache<Vec<f32>>,
    columns: LruCache<Vec<f32>>,
}

impl SparseMatrixReader {
    fn with_axes(axes: AxisReader, config: ReaderConfig) -> Self {
        Self {
            axes,
            matrix_type: axes.layout(),
            config,
            handle: MatrixHandle::default(),
            use_cache: config.use_cache,
            max_cache_size: config.max_cache_size,
            rows: LruCache::new(config.max_cache_size),
            columns: LruCache::new(config.max_cache_size),
        }
    }

    pub fn csr() -> Self {
        Self::with_axes(AxisReader::csr(), ReaderConfig::default())
    }

    pub fn csc() -> Self {
        Self::with_axes(AxisReader::csc(), ReaderConfig::default())
    }

    /// A reader for `matrix_type`; `UNKNOWN` has no reader.
    pub fn for_type(matrix_type: SparseMatrixType) -> anyhow::Result<Self> {
        Self::builder().layout(matrix_type).build()
    }

    pub fn builder() -> SparseMatrixReaderBuilder {
        SparseMatrixReaderBuilder::new()
    }

    /// Detects the layout of `path` and loads it.
    ///
    /// A file without a recognizable `format` attribute is read as CSR.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let matrix_type = Self::read_matrix_type(path);
        let mut reader = match matrix_type {
            SparseMatrixType::UNKNOWN => {
                log::warn!(
                    "no recognizable format attribute in {}, reading as CSR",
                    path.display()
                );
                Self::csr()
            }
            known => Self::for_type(known)?,
        };

        if !reader.read_file(path) {
            bail!("failed to read sparse matrix from {}", path.display());
        }
        Ok(reader)
    }

    /// Reads the `format` attribute of `path` without loading the matrix.
    pub fn read_matrix_type(path: impl AsRef<Path>) -> SparseMatrixType {
        crate::matrix::read_matrix_type(path)
    }

    /// Loads the matrix at `path`, replacing whatever was open.
    ///
    /// Returns `false` if the file is missing or malformed; the reader is then
    /// left empty. A previously open file is always closed first, which also
    /// restores the configured cache settings.
    pub fn read_file(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if self.handle.is_open() {
            self.reset(true);
        }

        if !path.exists() {
            log::error!("file does not exist: {}", path.display());
            return false;
        }

        match MatrixHandle::load(path, self.axes.primary_axis()) {
            Ok(handle) => {
                log::info!(
                    "opened {} matrix {} x {} from {}",
                    self.matrix_type,
                    handle.num_rows(),
                    handle.num_cols(),
                    path.display()
                );
                self.handle = handle;
                true
            }
            Err(e) => {
                log::error!("error reading {}: {:#}", path.display(), e);
                false
            }
        }
    }

    /// Closes the file, drops both caches and restores the configured cache
    /// settings. Unless `keep_type` is set the reported type becomes `UNKNOWN`.
    pub fn reset(&mut self, keep_type: bool) {
        self.handle.reset();
        self.rows.clear();
        self.columns.clear();

        self.use_cache = self.config.use_cache;
        self.max_cache_size = self.config.max_cache_size;
        self.rows.resize(self.max_cache_size);
        self.columns.resize(self.max_cache_size);

        if !keep_type {
            self.matrix_type = SparseMatrixType::UNKNOWN;
        }
    }

    /// Dense row `row`, of length [`num_cols`](Self::num_cols).
    pub fn get_row(&mut self, row: usize) -> Vec<f32> {
        self.get_line(Direction::ROW, row)
    }

    /// Dense column `column`, of length [`num_rows`](Self::num_rows).
    pub fn get_column(&mut self, column: usize) -> Vec<f32> {
        self.get_line(Direction::COLUMN, column)
    }

    /// Dense row or column `idx`, served from the axis cache when possible.
    pub fn get_line(&mut self, direction: Direction, idx: usize) -> Vec<f32> {
        let in_range = idx < self.line_count(direction);

        if self.use_cache && in_range {
            let cache = match direction {
                Direction::ROW => &mut self.rows,
                Direction::COLUMN => &mut self.columns,
            };
            if let Some(line) = cache.get(idx) {
                log::debug!("cache hit for {} {}", direction, idx);
                return line.clone();
            }
            log::debug!("cache miss for {} {}", direction, idx);
        }

        let line = match direction {
            Direction::ROW => self.axes.read_row(&self.handle, idx, &self.config),
            Direction::COLUMN => self.axes.read_column(&self.handle, idx, &self.config),
        };

        if self.use_cache && in_range {
            let cache = match direction {
                Direction::ROW => &mut self.rows,
                Direction::COLUMN => &mut self.columns,
            };
            cache.insert(idx, line.clone());
        }
        line
    }

    fn line_count(&self, direction: Direction) -> usize {
        match direction {
            Direction::ROW => self.handle.num_rows(),
            Direction::COLUMN => self.handle.num_cols(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.handle.num_rows()
    }

    pub fn num_cols(&self) -> usize {
        self.handle.num_cols()
    }

    pub fn nnz(&self) -> usize {
        self.handle.nnz()
    }

    pub fn has_obs_names(&self) -> bool {
        !self.handle.obs_names().is_empty()
    }

    pub fn obs_names(&self) -> &[String] {
        self.handle.obs_names()
    }

    pub fn has_var_names(&self) -> bool {
        !self.handle.var_names().is_empty()
    }

    pub fn var_names(&self) -> &[String] {
        self.handle.var_names()
    }

    pub fn matrix_type(&self) -> SparseMatrixType {
        self.matrix_type
    }

    pub fn type_string(&self) -> &'static str {
        self.matrix_type.as_str()
    }

    /// The compressed axis this reader was built for.
    pub fn primary_axis(&self) -> Direction {
        self.axes.primary_axis()
    }

    /// Pauses or resumes caching. Cached lines are kept while paused.
    pub fn set_use_cache(&mut self, use_cache: bool) {
        self.use_cache = use_cache;
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    /// Changes the bound of both caches, evicting least recently used lines at once.
    pub fn set_max_cache_size(&mut self, max_cache_size: usize) {
        if max_cache_size == self.max_cache_size {
            return;
        }
        self.max_cache_size = max_cache_size;
        self.rows.resize(max_cache_size);
        self.columns.resize(max_cache_size);
        debug_assert!(self.rows.len() <= max_cache_size);
        debug_assert!(self.columns.len() <= max_cache_size);
    }

    pub fn max_cache_size(&self) -> usize {
        self.max_cache_size
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.handle.path()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Cached row indices, most recently used first.
    pub fn cached_rows(&self) -> Vec<usize> {
        self.rows.ids_by_recency()
    }

    /// Cached column indices, most recently used first.
    pub fn cached_columns(&self) -> Vec<usize> {
        self.columns.ids_by_recency()
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn handle(&self) -> &MatrixHandle {
        &self.handle
    }
}

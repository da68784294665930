use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use byteorder::{LittleEndian, WriteBytesExt};
use nalgebra_sparse::{CscMatrix, CsrMatrix};

use super::element::{DType, Storable};
use super::{DatasetEntry, Manifest, ALIGNMENT, FORMAT_VERSION, HEADER_SIZE, MAGIC};

/// Builds a container file dataset by dataset.
///
/// Payloads are streamed to disk as they are added; the manifest and header are
/// written by [`finish`](Self::finish). A writer dropped without `finish` leaves an
/// unreadable file behind.
pub struct ContainerWriter {
    path: PathBuf,
    file: BufWriter<File>,
    position: u64,
    manifest: Manifest,
}

impl ContainerWriter {
    pub fn create(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufWriter::new(
            File::create(&path)
                .with_context(|| format!("failed to create container {}", path.display()))?,
        );
        // header is patched in `finish`
        file.write_all(&[0u8; HEADER_SIZE])?;

        Ok(Self {
            path,
            file,
            position: HEADER_SIZE as u64,
            manifest: Manifest {
                version: FORMAT_VERSION,
                ..Manifest::default()
            },
        })
    }

    /// Sets a file-level string attribute, replacing any previous value.
    pub fn attribute(&mut self, name: &str, value: &str) -> &mut Self {
        self.manifest
            .attributes
            .insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn write_dataset<T: Storable>(&mut self, name: &str, values: &[T]) -> anyhow::Result<()> {
        let offset = self.begin_dataset(name)?;
        for &value in values {
            value.write_le(&mut self.file)?;
        }
        let length = values.len() as u64 * T::DTYPE.byte_size().unwrap_or(0) as u64;
        self.end_dataset(name, T::DTYPE, values.len(), offset, length);
        Ok(())
    }

    pub fn write_string_dataset<S: AsRef<str>>(
        &mut self,
        name: &str,
        values: &[S],
    ) -> anyhow::Result<()> {
        let offset = self.begin_dataset(name)?;

        let mut end = 0u64;
        self.file.write_u64::<LittleEndian>(end)?;
        for value in values {
            end += value.as_ref().len() as u64;
            self.file.write_u64::<LittleEndian>(end)?;
        }
        for value in values {
            self.file.write_all(value.as_ref().as_bytes())?;
        }

        let length = (values.len() as u64 + 1) * 8 + end;
        self.end_dataset(name, DType::Utf8, values.len(), offset, length);
        Ok(())
    }

    fn begin_dataset(&mut self, name: &str) -> anyhow::Result<u64> {
        if self.manifest.datasets.contains_key(name) {
            bail!("dataset '{}' written twice to {}", name, self.path.display());
        }
        let aligned = self.position.div_ceil(ALIGNMENT) * ALIGNMENT;
        let padding = (aligned - self.position) as usize;
        self.file.write_all(&[0u8; ALIGNMENT as usize][..padding])?;
        self.position = aligned;
        Ok(aligned)
    }

    fn end_dataset(&mut self, name: &str, dtype: DType, count: usize, offset: u64, length: u64) {
        self.position += length;
        self.manifest.datasets.insert(
            name.to_owned(),
            DatasetEntry {
                dtype,
                shape: vec![count as u64],
                offset,
                length,
            },
        );
    }

    /// Writes the manifest and header and flushes the file.
    pub fn finish(mut self) -> anyhow::Result<PathBuf> {
        let manifest = serde_json::to_vec(&self.manifest).context("failed to encode manifest")?;
        let manifest_offset = self.position;
        self.file.write_all(&manifest)?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&MAGIC)?;
        self.file.write_u64::<LittleEndian>(manifest_offset)?;
        self.file.write_u64::<LittleEndian>(manifest.len() as u64)?;
        self.file
            .flush()
            .with_context(|| format!("failed to flush container {}", self.path.display()))?;

        log::debug!(
            "wrote container {} ({} datasets)",
            self.path.display(),
            self.manifest.datasets.len()
        );
        Ok(self.path)
    }
}

/// A compressed sparse matrix in memory that can be saved as a container.
pub trait CompressedSparse {
    /// Value of the `format` attribute.
    const FORMAT_TAG: &'static str;

    /// `(rows, cols)`
    fn shape(&self) -> (usize, usize);

    /// Offsets into `indices`/`values`, one per primary line plus one.
    fn offsets(&self) -> &[usize];

    /// Secondary-axis index of each stored value.
    fn indices(&self) -> &[usize];

    fn values(&self) -> &[f32];
}

impl CompressedSparse for CsrMatrix<f32> {
    const FORMAT_TAG: &'static str = "CSR";

    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn offsets(&self) -> &[usize] {
        self.row_offsets()
    }

    fn indices(&self) -> &[usize] {
        self.col_indices()
    }

    fn values(&self) -> &[f32] {
        CsrMatrix::values(self)
    }
}

impl CompressedSparse for CscMatrix<f32> {
    const FORMAT_TAG: &'static str = "CSC";

    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn offsets(&self) -> &[usize] {
        self.col_offsets()
    }

    fn indices(&self) -> &[usize] {
        self.row_indices()
    }

    fn values(&self) -> &[f32] {
        CscMatrix::values(self)
    }
}

/// Saves a sparse matrix with its own format tag, see [`save_sparse_tagged`].
pub fn save_sparse<M: CompressedSparse>(
    path: impl AsRef<Path>,
    matrix: &M,
    obs_names: Option<&[String]>,
    var_names: Option<&[String]>,
) -> anyhow::Result<PathBuf> {
    save_sparse_tagged(path, matrix, M::FORMAT_TAG, obs_names, var_names)
}

/// Saves a sparse matrix as `shape`, `data`, `indices`, `indptr` plus optional
/// `obs_names`/`var_names`, tagging it with the given `format` attribute.
///
/// Index arrays are stored as `int32` when every entry fits, `int64` otherwise.
pub fn save_sparse_tagged<M: CompressedSparse>(
    path: impl AsRef<Path>,
    matrix: &M,
    format_tag: &str,
    obs_names: Option<&[String]>,
    var_names: Option<&[String]>,
) -> anyhow::Result<PathBuf> {
    let (rows, cols) = matrix.shape();
    let mut writer = ContainerWriter::create(path)?;
    writer.attribute("format", format_tag);

    write_index_dataset(&mut writer, "shape", &[rows, cols])?;
    writer.write_dataset("data", matrix.values())?;
    write_index_dataset(&mut writer, "indices", matrix.indices())?;
    write_index_dataset(&mut writer, "indptr", matrix.offsets())?;

    if let Some(names) = obs_names {
        writer.write_string_dataset("obs_names", names)?;
    }
    if let Some(names) = var_names {
        writer.write_string_dataset("var_names", names)?;
    }

    writer.finish()
}

fn write_index_dataset(
    writer: &mut ContainerWriter,
    name: &str,
    values: &[usize],
) -> anyhow::Result<()> {
    let narrow: Result<Vec<i32>, _> = values.iter().map(|&v| i32::try_from(v)).collect();
    match narrow {
        Ok(narrow) => writer.write_dataset(name, &narrow),
        Err(_) => {
            let wide = values
                .iter()
                .map(|&v| i64::try_from(v))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("index dataset '{}' does not fit int64", name))?;
            writer.write_dataset(name, &wide)
        }
    }
}

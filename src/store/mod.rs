//! # Backing Store Access
//!
//! Read-only access to the single-file columnar container that holds a compressed
//! sparse matrix. A container is a set of named, typed, one-dimensional datasets plus
//! string attributes, described by a JSON manifest:
//!
//! ```text
//! offset 0    magic  b"SPH5\0\x01\0\0"
//! offset 8    u64 LE manifest offset
//! offset 16   u64 LE manifest length
//! offset 24.. dataset payloads (8-byte aligned, packed little-endian)
//! manifest    {"version": 1, "attributes": {..}, "datasets": {name: {dtype, shape, offset, length}}}
//! ```
//!
//! The file is memory-mapped on [`H5Container::open`]. Slice reads decode only the
//! bytes of the requested element range, so large `data`/`indices` arrays are never
//! materialized as a whole.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

mod element;
mod writer;

pub use element::{DType, Element, Storable};
pub use writer::{save_sparse, save_sparse_tagged, CompressedSparse, ContainerWriter};

/// Magic bytes at the start of every container file.
pub const MAGIC: [u8; 8] = *b"SPH5\x00\x01\x00\x00";

/// Size of the fixed header: magic, manifest offset, manifest length.
pub const HEADER_SIZE: usize = 24;

/// Alignment of every dataset payload.
pub const ALIGNMENT: u64 = 8;

/// Newest manifest version this crate understands.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DatasetEntry {
    pub dtype: DType,
    pub shape: Vec<u64>,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetEntry>,
}

/// Handle to one dataset of an open container.
///
/// Opening a dataset only resolves its location; no element is read until a
/// `read_*` call on the owning [`H5Container`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    name: String,
    dtype: DType,
    shape: Vec<usize>,
    count: usize,
    offset: usize,
    length: usize,
}

impl Dataset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements (product of the shape).
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn byte_range(&self, offset: usize, count: usize) -> anyhow::Result<std::ops::Range<usize>> {
        let width = self.dtype.byte_size().ok_or_else(|| {
            anyhow!(
                "dataset '{}' of type {} cannot be sliced",
                self.name,
                self.dtype
            )
        })?;
        let end = offset
            .checked_add(count)
            .filter(|&end| end <= self.len())
            .ok_or_else(|| {
                anyhow!(
                    "slice of {} elements at offset {} out of bounds for dataset '{}' of length {}",
                    count,
                    offset,
                    self.name,
                    self.len()
                )
            })?;
        Ok(self.offset + offset * width..self.offset + end * width)
    }
}

/// An open, read-only container file.
pub struct H5Container {
    path: PathBuf,
    mmap: Mmap,
    manifest: Manifest,
}

impl std::fmt::Debug for H5Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H5Container")
            .field("path", &self.path)
            .field("bytes", &self.mmap.len())
            .field("datasets", &self.manifest.datasets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl H5Container {
    /// Opens and validates a container.
    ///
    /// Fails if the path does not exist, the header is not recognized, the manifest
    /// cannot be parsed, or any dataset points outside the file.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("failed to open container {}", path.display()))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("failed to stat container {}", path.display()))?
            .len();
        if file_len < HEADER_SIZE as u64 {
            bail!(
                "{} is too small ({} bytes) to be a container",
                path.display(),
                file_len
            );
        }

        // SAFETY: the mapping is read-only and the file is not modified through this crate.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map container {}", path.display()))?;

        let manifest = Self::parse_manifest(&mmap)
            .with_context(|| format!("invalid container {}", path.display()))?;

        log::debug!(
            "opened container {} ({} bytes, {} datasets)",
            path.display(),
            mmap.len(),
            manifest.datasets.len()
        );

        Ok(Self {
            path,
            mmap,
            manifest,
        })
    }

    fn parse_manifest(bytes: &[u8]) -> anyhow::Result<Manifest> {
        if bytes[..MAGIC.len()] != MAGIC {
            bail!("unrecognized magic bytes {:?}", &bytes[..MAGIC.len()]);
        }
        let manifest_offset = LittleEndian::read_u64(&bytes[8..16]);
        let manifest_len = LittleEndian::read_u64(&bytes[16..24]);
        let manifest_range = checked_range(manifest_offset, manifest_len, bytes.len())
            .ok_or_else(|| {
                anyhow!(
                    "manifest [{}, +{}) exceeds file size {}",
                    manifest_offset,
                    manifest_len,
                    bytes.len()
                )
            })?;

        let manifest: Manifest = serde_json::from_slice(&bytes[manifest_range])
            .context("failed to parse manifest")?;
        if manifest.version > FORMAT_VERSION {
            bail!("unsupported container version {}", manifest.version);
        }

        for (name, entry) in &manifest.datasets {
            if checked_range(entry.offset, entry.length, bytes.len()).is_none() {
                bail!("dataset '{}' exceeds file size {}", name, bytes.len());
            }
            let count = element_count(&entry.shape).ok_or_else(|| {
                anyhow!("dataset '{}' shape {:?} overflows", name, entry.shape)
            })?;

            if entry.dtype.is_numeric() {
                let width = entry.dtype.byte_size().unwrap_or(0) as u64;
                let expected = count.checked_mul(width);
                if expected != Some(entry.length) {
                    bail!(
                        "dataset '{}' has {} payload bytes, shape {:?} of {} requires {:?}",
                        name,
                        entry.length,
                        entry.shape,
                        entry.dtype,
                        expected
                    );
                }
            } else {
                // offset table alone needs count + 1 u64 entries
                let table = count.checked_add(1).and_then(|n| n.checked_mul(8));
                if table.is_none_or(|table| table > entry.length) {
                    bail!(
                        "dataset '{}' has {} payload bytes, too few for {} strings",
                        name,
                        entry.length,
                        count
                    );
                }
            }
        }

        Ok(manifest)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a dataset with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.manifest.datasets.contains_key(name)
    }

    /// Names of all datasets, sorted.
    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.manifest.datasets.keys().map(String::as_str)
    }

    /// Looks up a file-level attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.manifest.attributes.get(name).map(String::as_str)
    }

    /// Reads a string attribute, logging and returning an empty string when it is absent.
    ///
    /// Absence is not an error here; callers validate the value themselves.
    pub fn read_attribute_string(&self, name: &str) -> String {
        match self.attribute(name) {
            Some(value) => value.to_owned(),
            None => {
                log::warn!(
                    "attribute '{}' not found in {}",
                    name,
                    self.path.display()
                );
                String::new()
            }
        }
    }

    /// Resolves a dataset handle without reading any elements.
    pub fn dataset(&self, name: &str) -> anyhow::Result<Dataset> {
        let entry = self
            .manifest
            .datasets
            .get(name)
            .ok_or_else(|| anyhow!("dataset '{}' not found in {}", name, self.path.display()))?;
        let shape = entry
            .shape
            .iter()
            .map(|&dim| usize::try_from(dim))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("dataset '{}' shape does not fit in memory", name))?;
        let count = element_count(&entry.shape)
            .and_then(|count| usize::try_from(count).ok())
            .ok_or_else(|| anyhow!("dataset '{}' element count does not fit in memory", name))?;
        Ok(Dataset {
            name: name.to_owned(),
            dtype: entry.dtype,
            shape,
            count,
            offset: entry.offset as usize,
            length: entry.length as usize,
        })
    }

    /// Reads the 2-element `shape` dataset as `(rows, cols)`.
    pub fn read_shape(&self) -> anyhow::Result<(usize, usize)> {
        let dataset = self.dataset("shape")?;
        let shape: Vec<usize> = self
            .read_full_array(&dataset)
            .context("failed to read matrix shape")?;
        match shape.as_slice() {
            &[rows, cols] => Ok((rows, cols)),
            other => bail!("shape must have 2 entries, found {}", other.len()),
        }
    }

    /// Reads a whole numeric dataset. Only meant for small arrays such as `indptr`.
    pub fn read_full_array<T: Element>(&self, dataset: &Dataset) -> anyhow::Result<Vec<T>> {
        self.read_slice(dataset, 0, dataset.len())
    }

    /// Reads exactly `count` elements starting at `offset`.
    pub fn read_slice<T: Element>(
        &self,
        dataset: &Dataset,
        offset: usize,
        count: usize,
    ) -> anyhow::Result<Vec<T>> {
        let mut out = Vec::with_capacity(count);
        self.read_slice_into(dataset, offset, count, &mut out)?;
        Ok(out)
    }

    /// Like [`read_slice`](Self::read_slice), reusing `out`'s allocation.
    ///
    /// Only the bytes of `[offset, offset + count)` are touched.
    pub fn read_slice_into<T: Element>(
        &self,
        dataset: &Dataset,
        offset: usize,
        count: usize,
        out: &mut Vec<T>,
    ) -> anyhow::Result<()> {
        let range = dataset.byte_range(offset, count)?;
        element::decode_into(dataset.dtype, &self.mmap[range], out)
            .with_context(|| format!("failed to decode dataset '{}'", dataset.name))
    }

    /// Reads a string table, or an empty vector if no dataset of that name exists.
    pub fn read_optional_string_array(&self, name: &str) -> anyhow::Result<Vec<String>> {
        if !self.contains(name) {
            return Ok(Vec::new());
        }

        let dataset = self.dataset(name)?;
        if dataset.dtype != DType::Utf8 {
            bail!(
                "dataset '{}' has type {}, expected {}",
                name,
                dataset.dtype,
                DType::Utf8
            );
        }
        let bytes = &self.mmap[dataset.offset..dataset.offset + dataset.length];
        element::decode_strings(bytes, dataset.len())
            .with_context(|| format!("failed to decode string dataset '{}'", name))
    }
}

fn element_count(shape: &[u64]) -> Option<u64> {
    shape.iter().try_fold(1u64, |acc, &dim| acc.checked_mul(dim))
}

fn checked_range(offset: u64, len: u64, file_len: usize) -> Option<std::ops::Range<usize>> {
    let end = offset.checked_add(len)?;
    if end > file_len as u64 {
        return None;
    }
    Some(offset as usize..end as usize)
}

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::store::save_sparse_tagged;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReferenceLayout {
    Csr,
    Csc,
}

/// Dense form of the 5 x 4 reference matrix.
pub(crate) const REFERENCE_DENSE: [[f32; 4]; 5] = [
    [0.0, 10.0, 50.0, 0.0],
    [0.0, 0.0, 20.2, 0.0],
    [30.4, 0.0, 0.0, 70.0],
    [0.0, 0.0, 0.0, 40.6],
    [0.0, 0.0, 0.0, 60.0],
];

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn reference_coo() -> CooMatrix<f32> {
    let rows = [0, 1, 2, 3, 0, 4, 2];
    let cols = [1, 2, 0, 3, 2, 3, 3];
    let values = [10.0, 20.2, 30.4, 40.6, 50.0, 60.0, 70.0];

    let mut coo = CooMatrix::new(5, 4);
    for ((&r, &c), &v) in rows.iter().zip(cols.iter()).zip(values.iter()) {
        coo.push(r, c, v);
    }
    coo
}

pub(crate) fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}{}", prefix, i)).collect()
}

/// Writes the reference matrix with names. The CSC file carries a lowercase `csc` tag.
pub(crate) fn write_reference(dir: &Path, layout: ReferenceLayout) -> PathBuf {
    init_logging();
    let coo = reference_coo();
    let obs = names("obs", 5);
    let var = names("var", 4);
    match layout {
        ReferenceLayout::Csr => save_sparse_tagged(
            dir.join("csr.sph5"),
            &CsrMatrix::from(&coo),
            "CSR",
            Some(obs.as_slice()),
            Some(var.as_slice()),
        ),
        ReferenceLayout::Csc => save_sparse_tagged(
            dir.join("csc.sph5"),
            &CscMatrix::from(&coo),
            "csc",
            Some(obs.as_slice()),
            Some(var.as_slice()),
        ),
    }
    .unwrap()
}

/// Random matrix without duplicate positions, plus its dense form.
pub(crate) fn random_matrix(
    rows: usize,
    cols: usize,
    density: f64,
    seed: u64,
) -> (CooMatrix<f32>, Vec<Vec<f32>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let nnz = ((rows * cols) as f64 * density).round() as usize;

    let mut coo = CooMatrix::new(rows, cols);
    let mut dense = vec![vec![0.0f32; cols]; rows];
    let mut positions = HashSet::new();

    while positions.len() < nnz {
        let i = rng.random_range(0..rows);
        let j = rng.random_range(0..cols);
        if positions.insert((i, j)) {
            let value: f32 = rng.random_range(0.5..100.0);
            coo.push(i, j, value);
            dense[i][j] = value;
        }
    }

    (coo, dense)
}

pub(crate) fn write_random(
    dir: &Path,
    layout: ReferenceLayout,
    coo: &CooMatrix<f32>,
) -> PathBuf {
    init_logging();
    match layout {
        ReferenceLayout::Csr => save_sparse_tagged(
            dir.join("random_csr.sph5"),
            &CsrMatrix::from(coo),
            "CSR",
            None,
            None,
        ),
        ReferenceLayout::Csc => save_sparse_tagged(
            dir.join("random_csc.sph5"),
            &CscMatrix::from(coo),
            "CSC",
            None,
            None,
        ),
    }
    .unwrap()
}

/// Rewrites the JSON manifest of a container file in place.
pub(crate) fn edit_manifest(path: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
    let mut bytes = std::fs::read(path).unwrap();
    let offset = LittleEndian::read_u64(&bytes[8..16]) as usize;
    let len = LittleEndian::read_u64(&bytes[16..24]) as usize;

    let mut manifest: serde_json::Value =
        serde_json::from_slice(&bytes[offset..offset + len]).unwrap();
    edit(&mut manifest);
    let encoded = serde_json::to_vec(&manifest).unwrap();

    bytes.truncate(offset);
    bytes.extend_from_slice(&encoded);
    LittleEndian::write_u64(&mut bytes[16..24], encoded.len() as u64);
    std::fs::write(path, bytes).unwrap();
}

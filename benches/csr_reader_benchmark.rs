use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rand::distr::{Distribution, Uniform};
use rand::{rngs::StdRng, SeedableRng};
use single_sparse_access::store::save_sparse;
use single_sparse_access::{SparseMatrixReader, SparseMatrixType};
use std::hint::black_box;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone)]
pub struct ReaderBenchConfig {
    seed: u64,
    matrix_sizes: Vec<(usize, usize)>,
    densities: Vec<f64>,
    lines_per_iter: usize,
    measurement_time: u64,
    sample_size: usize,
}

impl Default for ReaderBenchConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            matrix_sizes: vec![(1000, 1000), (5000, 2000), (20000, 2000)],
            densities: vec![0.01, 0.1],
            lines_per_iter: 16,
            measurement_time: 10,
            sample_size: 10,
        }
    }
}

fn write_test_matrix(
    dir: &Path,
    rows: usize,
    cols: usize,
    density: f64,
    seed: u64,
) -> PathBuf {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut coo = CooMatrix::new(rows, cols);
    let total_elements = (rows * cols) as f64 * density;
    let value_dist = Uniform::try_from(0.0f32..1.0).unwrap();
    let row_dist = Uniform::try_from(0..rows).unwrap();
    let col_dist = Uniform::try_from(0..cols).unwrap();

    for _ in 0..total_elements as usize {
        let row = row_dist.sample(&mut rng);
        let col = col_dist.sample(&mut rng);
        let value = value_dist.sample(&mut rng);
        coo.push(row, col, value);
    }

    let csr: CsrMatrix<f32> = (&coo).into();
    save_sparse(
        dir.join(format!("csr_{}x{}_d{}.sph5", rows, cols, density)),
        &csr,
        None,
        None,
    )
    .unwrap()
}

fn configure_group<'a, M: Measurement>(
    c: &'a mut Criterion<M>,
    name: &str,
    config: &ReaderBenchConfig,
) -> BenchmarkGroup<'a, M> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(config.measurement_time));
    group.sample_size(config.sample_size);
    group
}

fn open_reader(path: &Path, use_cache: bool) -> SparseMatrixReader {
    let mut reader = SparseMatrixReader::builder()
        .layout(SparseMatrixType::CSR)
        .use_cache(use_cache)
        .build()
        .unwrap();
    assert!(reader.read_file(path));
    reader
}

pub fn bench_csr_line_reads(c: &mut Criterion) {
    let config = ReaderBenchConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let mut group = configure_group(c, "CSR_Line_Reads", &config);

    for &(rows, cols) in config.matrix_sizes.iter() {
        for &density in config.densities.iter() {
            let seed = config.seed + (rows * cols) as u64;
            let path = write_test_matrix(dir.path(), rows, cols, density, seed);
            let label = format!("{}x{}_d{}", rows, cols, density);

            // Rows are the compressed axis
            let mut reader = open_reader(&path, false);
            group.bench_with_input(
                BenchmarkId::new("row_uncached", &label),
                &(rows, cols, density),
                |b, _| {
                    b.iter(|| {
                        for r in 0..config.lines_per_iter {
                            black_box(reader.get_row(r * rows / config.lines_per_iter));
                        }
                    });
                },
            );

            // Columns scan every row
            group.bench_with_input(
                BenchmarkId::new("column_uncached", &label),
                &(rows, cols, density),
                |b, _| {
                    b.iter(|| black_box(reader.get_column(cols / 2)));
                },
            );

            let mut reader = open_reader(&path, true);
            group.bench_with_input(
                BenchmarkId::new("column_cached", &label),
                &(rows, cols, density),
                |b, _| {
                    b.iter(|| black_box(reader.get_column(cols / 2)));
                },
            );
        }
    }
    group.finish();
}

pub fn bench_csr_open(c: &mut Criterion) {
    let config = ReaderBenchConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let mut group = configure_group(c, "CSR_Open", &config);

    for &(rows, cols) in config.matrix_sizes.iter() {
        let density = config.densities[0];
        let seed = config.seed + (rows * cols) as u64;
        let path = write_test_matrix(dir.path(), rows, cols, density, seed);

        group.bench_with_input(
            BenchmarkId::new("read_file", format!("{}x{}_d{}", rows, cols, density)),
            &path,
            |b, path| {
                let mut reader = SparseMatrixReader::csr();
                b.iter(|| assert!(reader.read_file(path)));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_csr_line_reads, bench_csr_open);
criterion_main!(benches);

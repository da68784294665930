pub mod adapter;
pub mod cache;
pub mod matrix;
pub mod reader;
pub mod store;
mod utils;

#[cfg(test)]
mod test_utils;

pub use adapter::SharedReader;
pub use matrix::{read_matrix_type, MatrixHandle, SparseMatrixType};
pub use reader::{ReaderConfig, SparseMatrixReader, SparseMatrixReaderBuilder};
pub use utils::Direction;
pub use utils::ZeroVec;

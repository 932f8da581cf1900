//! Data containers for single-cell count data

mod count_matrix;

pub use count_matrix::CountMatrix;

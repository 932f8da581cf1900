//! Count matrix representation for single-cell RNA-seq data

use ndarray::{Array1, Array2, Axis};

use crate::error::{BasicsError, Result};

/// A count matrix of raw sequencing reads.
/// Rows are genes, columns are cells.
///
/// The per-gene row sums are precomputed at construction because the mean
/// updater consumes them on every MCMC iteration.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Raw count data (genes x cells)
    counts: Array2<f64>,
    /// Gene identifiers
    gene_ids: Vec<String>,
    /// Cell identifiers
    cell_ids: Vec<String>,
    /// Row sums: total counts per gene across all cells
    sum_by_cell: Array1<f64>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_genes, n_cells) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(BasicsError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if cell_ids.len() != n_cells {
            return Err(BasicsError::DimensionMismatch {
                expected: format!("{} cell IDs", n_cells),
                got: format!("{} cell IDs", cell_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(BasicsError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0) {
            return Err(BasicsError::InvalidCountMatrix {
                reason: "All cells have 0 counts for all genes".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "Some count values are not integers. The negative binomial \
                 model expects integer counts."
            );
        }

        let sum_by_cell = counts.sum_axis(Axis(1));

        Ok(Self {
            counts,
            gene_ids,
            cell_ids,
            sum_by_cell,
        })
    }

    /// Create from integer counts
    pub fn from_integers(
        counts: Array2<u32>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> Result<Self> {
        let float_counts = counts.mapv(|x| x as f64);
        Self::new(float_counts, gene_ids, cell_ids)
    }

    /// Get the number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Get the number of cells
    pub fn n_cells(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts
    pub fn counts(&self) -> &Array2<f64> {
        &self.counts
    }

    /// Get the gene identifiers
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Get the cell identifiers
    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// Total counts per gene, summed across cells.
    ///
    /// This is the aggregate that multiplies the log-mean increment in the
    /// mean updater's likelihood ratio.
    pub fn sum_by_cell(&self) -> &Array1<f64> {
        &self.sum_by_cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_valid_construction() {
        let counts = array![[4.0, 0.0, 2.0], [1.0, 3.0, 5.0]];
        let cm = CountMatrix::new(counts, ids("gene", 2), ids("cell", 3)).unwrap();
        assert_eq!(cm.n_genes(), 2);
        assert_eq!(cm.n_cells(), 3);
        assert_eq!(cm.sum_by_cell()[0], 6.0);
        assert_eq!(cm.sum_by_cell()[1], 9.0);
    }

    #[test]
    fn test_id_length_mismatch() {
        let counts = array![[1.0, 2.0], [3.0, 4.0]];
        let result = CountMatrix::new(counts.clone(), ids("gene", 3), ids("cell", 2));
        assert!(matches!(result, Err(BasicsError::DimensionMismatch { .. })));

        let result = CountMatrix::new(counts, ids("gene", 2), ids("cell", 1));
        assert!(matches!(result, Err(BasicsError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_negative_and_non_finite_counts_rejected() {
        let counts = array![[1.0, -2.0], [3.0, 4.0]];
        assert!(CountMatrix::new(counts, ids("gene", 2), ids("cell", 2)).is_err());

        let counts = array![[1.0, f64::NAN], [3.0, 4.0]];
        assert!(CountMatrix::new(counts, ids("gene", 2), ids("cell", 2)).is_err());
    }

    #[test]
    fn test_all_zero_rejected() {
        let counts = array![[0.0, 0.0], [0.0, 0.0]];
        assert!(CountMatrix::new(counts, ids("gene", 2), ids("cell", 2)).is_err());
    }

    #[test]
    fn test_from_integers() {
        let counts = array![[1u32, 2u32], [3u32, 4u32]];
        let cm = CountMatrix::from_integers(counts, ids("gene", 2), ids("cell", 2)).unwrap();
        assert_eq!(cm.counts()[[1, 0]], 3.0);
    }
}

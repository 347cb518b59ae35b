//! Generation of random snapshot matrices.

use ndarray::{Array, Array1, Array2};
use ndarray_linalg::QR;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

pub trait RandomMatrix: Sized {
    /// Generate a matrix with independent standard normal entries.
    ///
    /// # Arguments
    ///
    /// * `dimension`: Tuple (rows, cols) specifying the number of rows and columns.
    /// * `rng`: The random number generator to use.
    fn random_gaussian<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<Self>;

    /// Generate a `rows x cols` matrix with orthonormal columns, `rows >= cols`.
    fn random_orthonormal_columns<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<Self>;

    /// Generate a random approximate low-rank matrix.
    ///
    /// The singular values are logarithmically distributed between
    /// `sigma_min` and `sigma_max`, which mimics the decay seen in snapshot
    /// matrices of smooth simulations.
    fn random_approximate_low_rank_matrix<R: Rng>(
        dimension: (usize, usize),
        sigma_max: f64,
        sigma_min: f64,
        rng: &mut R,
    ) -> Array2<Self>;
}

impl RandomMatrix for f64 {
    fn random_gaussian<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<f64> {
        Array2::from_shape_simple_fn(dimension, || StandardNormal.sample(&mut *rng))
    }

    fn random_orthonormal_columns<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<f64> {
        assert!(
            dimension.0 >= dimension.1,
            "Cannot have {} orthonormal columns of length {}.",
            dimension.1,
            dimension.0
        );
        let (q, _) = Self::random_gaussian(dimension, rng)
            .qr()
            .expect("QR of a Gaussian matrix failed.");
        q
    }

    fn random_approximate_low_rank_matrix<R: Rng>(
        dimension: (usize, usize),
        sigma_max: f64,
        sigma_min: f64,
        rng: &mut R,
    ) -> Array2<f64> {
        assert!(
            sigma_min < sigma_max,
            "`sigma_min` must be smaller than `sigma_max`"
        );
        assert!(sigma_min > 0.0, "`sigma_min` must be positive.");

        let (rows, cols) = dimension;
        let rank = rows.min(cols);
        let singvals: Array1<f64> = Array::geomspace(sigma_max, sigma_min, rank)
            .expect("Singular values are positive.");

        // U * diag(sigma), scaling each column by its singular value.
        let left = Self::random_orthonormal_columns((rows, rank), rng) * &singvals;
        let right = Self::random_orthonormal_columns((cols, rank), rng);
        left.dot(&right.t())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_linalg::SVD;

    #[test]
    fn test_orthonormal_columns() {
        let mut rng = rand::thread_rng();
        let q = f64::random_orthonormal_columns((30, 7), &mut rng);
        let gram = q.t().dot(&q);

        assert_eq!(q.dim(), (30, 7));
        for ((row, col), &value) in gram.indexed_iter() {
            let expected = if row == col { 1.0 } else { 0.0 };
            assert!((value - expected).abs() < 1E-12);
        }
    }

    #[test]
    fn test_low_rank_matrix_has_requested_spectrum() {
        let mut rng = rand::thread_rng();
        for &dimension in [(40, 20), (20, 40)].iter() {
            let mat = f64::random_approximate_low_rank_matrix(dimension, 1.0, 1E-8, &mut rng);
            let (_, sigma, _) = mat.svd(false, false).unwrap();

            assert_eq!(mat.dim(), dimension);
            assert!((sigma[0] - 1.0).abs() < 1E-10);
            assert!((sigma[19] - 1E-8).abs() < 1E-12);
        }
    }
}

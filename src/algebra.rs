//! Dense algebra on row-distributed matrices.
//!
//! Every product exists as a canonical `*_into` body that resizes and fills a
//! caller supplied result, and as a wrapper that returns a freshly allocated
//! result built on the same body.
//!
//! Distribution rules:
//!
//! | Operation | `self` | operand | result |
//! |---|---|---|---|
//! | `mult` | any | undistributed | distribution of `self` |
//! | `mult_vector` | any | undistributed | distribution of `self` |
//! | `mult_plus` | same as `a` | undistributed | accumulated into `a` |
//! | `transpose_mult` | same as operand | same as `self` | undistributed |
//! | `inverse`, `pseudoinverse` | undistributed | | undistributed |
//!
//! The transposed products contract over the row dimension. For distributed
//! operands the local partial products are summed over the process group.

use crate::matrix::Matrix;
use crate::types::Result;
use crate::vector::Vector;
use ndarray::linalg::{general_mat_mul, general_mat_vec_mul};
use ndarray::Axis;
use ndarray_linalg::{Inverse, JobSvd, SVDDC};

impl<'a> Matrix<'a> {
    /// Return `self * other`.
    pub fn mult(&self, other: &Matrix) -> Matrix<'static> {
        let mut result = Matrix::empty(self.comm());
        self.mult_into(other, &mut result);
        result
    }

    /// Compute `self * other` into `result`, resizing it as needed.
    pub fn mult_into(&self, other: &Matrix, result: &mut Matrix) {
        assert!(
            !other.distributed(),
            "`mult` requires an undistributed right operand."
        );
        assert_eq!(
            self.num_columns(),
            other.num_rows(),
            "`mult` requires matching inner dimensions."
        );

        result.resize(self.num_rows(), other.num_columns());
        result.set_distributed(self.distributed());
        general_mat_mul(1.0, &self.view(), &other.view(), 0.0, &mut result.view_mut());
    }

    /// Return `self * other`.
    pub fn mult_vector(&self, other: &Vector) -> Vector<'static> {
        let mut result = Vector::new(0, false, self.comm());
        self.mult_vector_into(other, &mut result);
        result
    }

    /// Compute `self * other` into `result`, resizing it as needed.
    pub fn mult_vector_into(&self, other: &Vector, result: &mut Vector) {
        assert!(
            !other.distributed(),
            "`mult_vector` requires an undistributed right operand."
        );
        assert_eq!(
            self.num_columns(),
            other.dim(),
            "`mult_vector` requires matching inner dimensions."
        );

        result.resize(self.num_rows());
        result.set_distributed(self.distributed());
        general_mat_vec_mul(1.0, &self.view(), &other.view(), 0.0, &mut result.view_mut());
    }

    /// Accumulate `a += c * self * b`.
    pub fn mult_plus(&self, a: &mut Vector, b: &Vector, c: f64) {
        assert!(
            a.distributed() == self.distributed(),
            "`mult_plus` requires the accumulator to share the distribution of the matrix."
        );
        assert!(
            !b.distributed(),
            "`mult_plus` requires an undistributed right operand."
        );
        assert_eq!(self.num_columns(), b.dim(), "`mult_plus` requires matching inner dimensions.");
        assert_eq!(self.num_rows(), a.dim(), "`mult_plus` requires matching outer dimensions.");

        general_mat_vec_mul(c, &self.view(), &b.view(), 1.0, &mut a.view_mut());
    }

    /// Return `self^T * other`.
    pub fn transpose_mult(&self, other: &Matrix) -> Matrix<'static> {
        let mut result = Matrix::empty(self.comm());
        self.transpose_mult_into(other, &mut result);
        result
    }

    /// Compute `self^T * other` into `result`, resizing it as needed.
    ///
    /// Collective if the operands are distributed. The result is always undistributed.
    pub fn transpose_mult_into(&self, other: &Matrix, result: &mut Matrix) {
        assert!(
            self.distributed() == other.distributed(),
            "`transpose_mult` requires operands with the same distribution."
        );
        assert_eq!(
            self.num_rows(),
            other.num_rows(),
            "`transpose_mult` requires operands with the same number of rows."
        );

        result.resize(self.num_columns(), other.num_columns());
        result.set_distributed(false);
        general_mat_mul(1.0, &self.view().t(), &other.view(), 0.0, &mut result.view_mut());

        if self.distributed() {
            self.comm().all_reduce_sum(result.as_mut_slice());
        }
    }

    /// Return `self^T * other`.
    pub fn transpose_mult_vector(&self, other: &Vector) -> Vector<'static> {
        let mut result = Vector::new(0, false, self.comm());
        self.transpose_mult_vector_into(other, &mut result);
        result
    }

    /// Compute `self^T * other` into `result`, resizing it as needed.
    ///
    /// Collective if the operands are distributed. The result is always undistributed.
    pub fn transpose_mult_vector_into(&self, other: &Vector, result: &mut Vector) {
        assert!(
            self.distributed() == other.distributed(),
            "`transpose_mult_vector` requires operands with the same distribution."
        );
        assert_eq!(
            self.num_rows(),
            other.dim(),
            "`transpose_mult_vector` requires operands with the same number of rows."
        );

        result.resize(self.num_columns());
        result.set_distributed(false);
        general_mat_vec_mul(1.0, &self.view().t(), &other.view(), 0.0, &mut result.view_mut());

        if self.distributed() {
            self.comm().all_reduce_sum(result.as_mut_slice());
        }
    }

    /// Return the inverse of a square undistributed matrix.
    pub fn inverse(&self) -> Result<Matrix<'static>> {
        let mut result = Matrix::empty(self.comm());
        self.inverse_into(&mut result)?;
        Ok(result)
    }

    /// Compute the inverse into `result`, resizing it as needed.
    pub fn inverse_into(&self, result: &mut Matrix) -> Result<()> {
        self.assert_invertible();
        let inv = self.view().inv()?;

        result.resize(self.num_rows(), self.num_columns());
        result.set_distributed(false);
        result.view_mut().assign(&inv);
        Ok(())
    }

    /// Replace `self` by its inverse.
    pub fn inverse_in_place(&mut self) -> Result<()> {
        self.assert_invertible();
        let inv = self.view().inv()?;
        self.view_mut().assign(&inv);
        Ok(())
    }

    /// Compute the Moore-Penrose pseudoinverse and store its **transpose** in `self`.
    ///
    /// For an `m x n` matrix `A` with `m >= n` the pseudoinverse `A^+` is `n x m`.
    /// Its transpose has the shape of `A`, so it overwrites `self` without
    /// reallocation. Callers wanting `A^+` itself must transpose the result.
    ///
    /// Singular values below `max(m, n) * eps * sigma_max` are treated as zero.
    pub fn pseudoinverse(&mut self) -> Result<()> {
        assert!(
            !self.distributed(),
            "`pseudoinverse` requires an undistributed matrix."
        );
        assert!(
            self.num_rows() >= self.num_columns(),
            "`pseudoinverse` requires at least as many rows as columns."
        );
        if self.is_empty() {
            return Ok(());
        }

        let (u, sigma, vt) = self.view().svddc(JobSvd::Some)?;
        let (mut u, vt) = match (u, vt) {
            (Some(u), Some(vt)) => (u, vt),
            _ => unreachable!("A thin SVD always returns both singular bases."),
        };

        let cutoff = self.num_rows() as f64 * f64::EPSILON * sigma[0];
        for (mut col, &value) in u.axis_iter_mut(Axis(1)).zip(sigma.iter()) {
            if value > cutoff {
                col.mapv_inplace(|item| item / value);
            } else {
                col.fill(0.0);
            }
        }

        self.view_mut().assign(&u.dot(&vt));
        Ok(())
    }

    fn assert_invertible(&self) {
        assert!(
            !self.distributed(),
            "`inverse` requires an undistributed matrix."
        );
        assert_eq!(
            self.num_rows(),
            self.num_columns(),
            "`inverse` requires a square matrix."
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::comm::{SelfComm, ThreadComm};
    use crate::helpers::RelDiff;
    use crate::matrix::Matrix;
    use crate::random_matrix::RandomMatrix;
    use crate::vector::Vector;
    use ndarray::{array, s, Array1, Array2};
    use ndarray_linalg::Inverse;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Rows owned by `rank` when `counts` rows are assigned to the ranks in order.
    fn row_block(counts: &[usize], rank: usize) -> std::ops::Range<usize> {
        let start: usize = counts[..rank].iter().sum();
        start..start + counts[rank]
    }

    #[test]
    fn test_mult_undistributed() {
        let comm = SelfComm::handle();
        let a = Matrix::from_array(array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].view(), false, &comm);
        let b = Matrix::from_array(array![[1.0, 0.0, 2.0], [0.0, 1.0, 1.0]].view(), false, &comm);

        let c = a.mult(&b);

        assert!(!c.distributed());
        assert_eq!(
            c.to_array(),
            array![[1.0, 2.0, 4.0], [3.0, 4.0, 10.0], [5.0, 6.0, 16.0]]
        );
    }

    #[test]
    fn test_mult_into_borrowed_result() {
        let comm = SelfComm::handle();
        let a = Matrix::from_array(array![[1.0, 2.0], [3.0, 4.0]].view(), false, &comm);
        let mut buffer = vec![0.0; 4];
        {
            let mut result = Matrix::wrap(&mut buffer, 2, 2, false, &comm);
            a.mult_into(&a, &mut result);
        }
        assert_eq!(buffer, vec![7.0, 10.0, 15.0, 22.0]);
    }

    #[test]
    #[should_panic(expected = "undistributed right operand")]
    fn test_mult_rejects_distributed_operand() {
        let comm = SelfComm::handle();
        let a = Matrix::new(2, 2, false, &comm);
        let b = Matrix::new(2, 2, true, &comm);
        a.mult(&b);
    }

    #[test]
    fn test_mult_vector_and_mult_plus() {
        let comm = SelfComm::handle();
        let a = Matrix::from_array(array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].view(), false, &comm);
        let x = Vector::from_slice(&[1.0, -1.0], false, &comm);

        let y = a.mult_vector(&x);
        assert_eq!(y.as_slice(), &[-1.0, -1.0, -1.0]);

        let mut acc = Vector::from_slice(&[1.0, 2.0, 3.0], false, &comm);
        a.mult_plus(&mut acc, &x, 2.0);
        assert_eq!(acc.as_slice(), &[-1.0, 0.0, 1.0]);

        let z = a.transpose_mult_vector(&y);
        assert_eq!(z.as_slice(), &[-9.0, -12.0]);
    }

    #[test]
    fn test_distributed_products_match_gathered_matrix() {
        let counts = [3, 5, 2];
        let total: usize = counts.iter().sum();
        let full = f64::random_gaussian((total, 4), &mut StdRng::seed_from_u64(11));
        let right = f64::random_gaussian((4, 3), &mut StdRng::seed_from_u64(12));
        let x = Array1::from(vec![0.5, -1.0, 2.0, 1.0]);

        let results = ThreadComm::run(counts.len(), |comm| {
            let rows = row_block(&counts, comm.rank());
            let local = Matrix::from_array(full.slice(s![rows.clone(), ..]), true, &comm);
            let right = Matrix::from_array(right.view(), false, &comm);
            let x = Vector::from_slice(x.as_slice().unwrap(), false, &comm);

            let product = local.mult(&right);
            let mut acc = Vector::new(rows.len(), true, &comm);
            local.mult_plus(&mut acc, &x, 1.0);
            let gram = local.transpose_mult(&local);
            let projected = local.transpose_mult_vector(&acc);

            assert!(product.distributed());
            assert!(!gram.distributed());
            assert!(!projected.distributed());
            (rows, product.to_array(), acc.as_slice().to_vec(), gram.to_array(), projected.as_slice().to_vec())
        });

        let expected_product = full.dot(&right);
        let expected_acc = full.dot(&x);
        let expected_gram = full.t().dot(&full);
        let expected_projected = full.t().dot(&expected_acc);

        for (rows, product, acc, gram, projected) in results {
            assert!(f64::rel_diff_fro(product.view(), expected_product.slice(s![rows.clone(), ..])) < 1E-12);
            assert!(f64::rel_diff_l2(Array1::from(acc).view(), expected_acc.slice(s![rows])) < 1E-12);
            assert!(f64::rel_diff_fro(gram.view(), expected_gram.view()) < 1E-12);
            assert!(f64::rel_diff_l2(Array1::from(projected).view(), expected_projected.view()) < 1E-12);
        }
    }

    macro_rules! inverse_tests {
        ($($name:ident: $dim:expr,)*) => {
            $(
        #[test]
        fn $name() {
            let comm = SelfComm::handle();
            let mut rng = rand::thread_rng();
            let mat = Matrix::from_array(f64::random_gaussian(($dim, $dim), &mut rng).view(), false, &comm);

            let inv = mat.inverse().unwrap();
            let prod = inv.mult(&mat);
            let eye = Array2::<f64>::eye($dim);
            assert!(f64::rel_diff_fro(prod.view(), eye.view()) < 1E-10);

            let mut in_place = mat.clone();
            in_place.inverse_in_place().unwrap();
            assert_eq!(in_place.as_slice(), inv.as_slice());

            let mut into = Matrix::empty(&comm);
            mat.inverse_into(&mut into).unwrap();
            assert_eq!(into.as_slice(), inv.as_slice());
        }
            )*
        };
    }

    inverse_tests! {
        test_inverse_small: 3,
        test_inverse_medium: 20,
        test_inverse_large: 60,
    }

    #[test]
    fn test_inverse_of_singular_matrix_is_an_error() {
        let comm = SelfComm::handle();
        let mat = Matrix::from_array(array![[1.0, 2.0], [2.0, 4.0]].view(), false, &comm);
        assert!(mat.inverse().is_err());
    }

    #[test]
    #[should_panic(expected = "square matrix")]
    fn test_inverse_requires_square_matrix() {
        let comm = SelfComm::handle();
        let mat = Matrix::new(3, 2, false, &comm);
        let _ = mat.inverse();
    }

    macro_rules! pseudoinverse_tests {
        ($($name:ident: $dim:expr,)*) => {
            $(
        #[test]
        fn $name() {
            let comm = SelfComm::handle();
            let mut rng = rand::thread_rng();
            let arr = f64::random_gaussian($dim, &mut rng);

            // For full column rank the pseudoinverse is (A^T A)^{-1} A^T.
            let expected = arr.t().dot(&arr).inv().unwrap().dot(&arr.t());

            let mut mat = Matrix::from_array(arr.view(), false, &comm);
            mat.pseudoinverse().unwrap();

            assert_eq!(mat.num_rows(), $dim.0);
            assert_eq!(mat.num_columns(), $dim.1);
            assert!(f64::rel_diff_fro(mat.view().t(), expected.view()) < 1E-10);
        }
            )*
        };
    }

    pseudoinverse_tests! {
        test_pseudoinverse_square: (8, 8),
        test_pseudoinverse_thin: (50, 10),
        test_pseudoinverse_very_thin: (200, 3),
    }

    #[test]
    fn test_pseudoinverse_fixed_example() {
        let comm = SelfComm::handle();
        let mut mat = Matrix::from_array(array![[1.0, 0.0], [0.0, 2.0], [0.0, 0.0]].view(), false, &comm);
        mat.pseudoinverse().unwrap();

        assert!(f64::rel_diff_fro(mat.view(), array![[1.0, 0.0], [0.0, 0.5], [0.0, 0.0]].view()) < 1E-14);
    }

    #[test]
    #[should_panic(expected = "at least as many rows as columns")]
    fn test_pseudoinverse_requires_tall_matrix() {
        let comm = SelfComm::handle();
        let mut mat = Matrix::new(2, 3, false, &comm);
        let _ = mat.pseudoinverse();
    }
}

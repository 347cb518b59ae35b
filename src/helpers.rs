//! Relative error measures used to compare matrices.

use ndarray::{ArrayView1, ArrayView2};
use ndarray_linalg::{Norm, OperationNorm, Scalar};

pub trait RelDiff {
    type A: Scalar;

    /// Return the relative Frobenius norm difference of `first` and `second`.
    fn rel_diff_fro(
        first: ArrayView2<Self::A>,
        second: ArrayView2<Self::A>,
    ) -> <<Self as RelDiff>::A as Scalar>::Real;

    /// Return the relative l2 vector norm difference of `first` and `second`.
    fn rel_diff_l2(
        first: ArrayView1<Self::A>,
        second: ArrayView1<Self::A>,
    ) -> <<Self as RelDiff>::A as Scalar>::Real;
}

impl RelDiff for f64 {
    type A = f64;

    fn rel_diff_fro(first: ArrayView2<f64>, second: ArrayView2<f64>) -> f64 {
        let diff = first.to_owned() - &second;
        diff.opnorm_fro().unwrap() / second.opnorm_fro().unwrap()
    }

    fn rel_diff_l2(first: ArrayView1<f64>, second: ArrayView1<f64>) -> f64 {
        let diff = first.to_owned() - &second;
        diff.norm_l2() / second.norm_l2()
    }
}

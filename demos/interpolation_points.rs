use ndarray::s;
use rusty_reduction::{Matrix, PivotBackend, QrcpConfig, RandomMatrix, SelfComm, ThreadComm};

pub fn main() {
    let num_snapshots = 30;
    let counts = [120, 45, 85];
    let num_points = 12;

    // Snapshot basis with rapidly decaying singular values, one row per grid point.
    let mut rng = rand::thread_rng();
    let basis = f64::random_approximate_low_rank_matrix(
        (counts.iter().sum(), num_snapshots),
        1.0,
        1E-10,
        &mut rng,
    );

    let serial = Matrix::from_array(basis.view(), false, &SelfComm::handle());
    let expected = serial.qrcp_pivots_transpose(num_points);
    println!("Serial interpolation rows: {:?}", expected.row_pivot);

    let lapack = serial.qrcp_pivots_transpose_with(
        num_points,
        &QrcpConfig::default().with_backend(PivotBackend::Lapack),
    );
    println!("LAPACK interpolation rows: {:?}", lapack.row_pivot);

    let results = ThreadComm::run(counts.len(), |comm| {
        let start: usize = counts[..comm.rank()].iter().sum();
        let block = basis.slice(s![start..start + counts[comm.rank()], ..]);
        let local = Matrix::from_array(block, true, &comm);

        let pivots = local.qrcp_pivots_transpose(num_points);
        let gram = local.transpose_mult(&local);
        (pivots, gram.num_rows())
    });

    for (rank, (pivots, gram_rows)) in results.iter().enumerate() {
        println!(
            "Rank {} owns interpolation rows {:?}; Gram matrix has {} rows.",
            rank,
            pivots.owned_by(rank),
            gram_rows
        );
        assert_eq!(pivots.row_pivot, expected.row_pivot);
    }

    println!("Success");
}

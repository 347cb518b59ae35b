use ndarray::s;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusty_reduction::{Matrix, MpiComm, RandomMatrix, SelfComm};

// Run with `mpirun -n <procs> interpolation_points_mpi`.
pub fn main() {
    let universe = mpi::initialize().expect("failed to initialize MPI");
    let comm = MpiComm::world(&universe);

    let rows_per_rank = 40;
    let num_snapshots = 20;
    let num_points = 10;

    // Every rank draws the same basis and keeps its own block of rows.
    let mut rng = StdRng::seed_from_u64(42);
    let basis = f64::random_approximate_low_rank_matrix(
        (rows_per_rank * comm.size(), num_snapshots),
        1.0,
        1E-10,
        &mut rng,
    );
    let start = comm.rank() * rows_per_rank;
    let local = Matrix::from_array(
        basis.slice(s![start..start + rows_per_rank, ..]),
        true,
        &comm,
    );

    let pivots = local.qrcp_pivots_transpose(num_points);
    let expected = Matrix::from_array(basis.view(), false, &SelfComm::handle())
        .qrcp_pivots_transpose(num_points);
    assert_eq!(pivots.row_pivot, expected.row_pivot);

    println!(
        "Rank {} of {} owns interpolation rows {:?}",
        comm.rank(),
        comm.size(),
        pivots.owned_by(comm.rank())
    );

    comm.barrier();
    if comm.rank() == 0 {
        println!("Success");
    }
}

//! Distributed dense matrices and interpolation point selection for reduced
//! order models.
//!
//! Rows of a [`Matrix`] may be spread over the processes of a [`Communicator`]
//! group. Collective operations must be entered by every member of the group in
//! the same order.

pub mod algebra;
pub mod comm;
pub mod helpers;
pub mod io;
pub mod matrix;
#[cfg(feature = "mpi-support")]
pub mod mpi_comm;
pub mod pivoted_qr;
pub mod random_matrix;
pub mod storage;
pub mod topology;
pub mod types;
pub mod vector;

pub use comm::{Comm, Communicator, SelfComm, ThreadComm};
pub use helpers::RelDiff;
pub use matrix::Matrix;
#[cfg(feature = "mpi-support")]
pub use mpi_comm::MpiComm;
pub use pivoted_qr::{PivotBackend, PivotResult, QrcpConfig};
pub use random_matrix::RandomMatrix;
pub use topology::{row_topology, BalancedRows, ReplicatedRows, RowTopology, UnbalancedRows};
pub use types::{Result, RustyReductionError};
pub use vector::Vector;

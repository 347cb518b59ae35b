//! Per-process file output and input of matrices.
//!
//! Every process writes its own local block to a file whose name carries the
//! rank, zero-padded to six digits.

use crate::comm::Comm;
use crate::matrix::Matrix;
use crate::storage::Storage;
use crate::types::{Result, RustyReductionError};
use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

/// On-disk layout of the local block of a matrix.
#[derive(Serialize, Deserialize)]
struct MatrixRecord<'r> {
    num_rows: usize,
    num_cols: usize,
    distributed: bool,
    num_procs: usize,
    data: Cow<'r, [f64]>,
}

fn rank_file_name(base: &str, separator: &str, rank: usize) -> String {
    format!("{}{}{:06}", base, separator, rank)
}

impl<'a> Matrix<'a> {
    /// Write the local rows as text to `"{prefix}{rank:06}"`.
    ///
    /// One line per row, values in scientific notation separated by spaces.
    pub fn print(&self, prefix: &str) -> Result<()> {
        let path = rank_file_name(prefix, "", self.comm().rank());
        let mut writer = BufWriter::new(File::create(&path)?);

        for row in self.view().rows() {
            writeln!(writer, "{}", row.iter().map(|value| format!("{:e}", value)).join(" "))?;
        }
        writer.flush()?;

        info!("Printed {} x {} block to {}.", self.num_rows(), self.num_columns(), path);
        Ok(())
    }

    /// Write the local block in binary form to `"{base}.{rank:06}"`.
    ///
    /// The file can be read back with [`Matrix::read`] by the same rank of a
    /// group of the same size.
    pub fn write(&self, base: &str) -> Result<()> {
        let path = rank_file_name(base, ".", self.comm().rank());
        let record = MatrixRecord {
            num_rows: self.num_rows(),
            num_cols: self.num_columns(),
            distributed: self.distributed(),
            num_procs: self.num_procs(),
            data: Cow::Borrowed(self.as_slice()),
        };

        let mut writer = BufWriter::new(File::create(&path)?);
        bincode::serde::encode_into_std_write(&record, &mut writer, bincode::config::standard())?;
        writer.flush()?;

        info!("Wrote {} x {} block to {}.", record.num_rows, record.num_cols, path);
        Ok(())
    }
}

impl Matrix<'static> {
    /// Read a matrix written by [`Matrix::write`] from `"{base}.{rank:06}"`.
    ///
    /// The result owns its storage and lives on `comm`.
    pub fn read(base: &str, comm: &Comm) -> Result<Self> {
        let path = rank_file_name(base, ".", comm.rank());
        let mut reader = BufReader::new(File::open(&path)?);
        let record: MatrixRecord<'static> =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;

        if record.data.len() != record.num_rows * record.num_cols {
            return Err(RustyReductionError::FormatError(format!(
                "{} holds {} values for a {} x {} matrix.",
                path,
                record.data.len(),
                record.num_rows,
                record.num_cols
            )));
        }
        if record.num_procs != comm.size() {
            return Err(RustyReductionError::FormatError(format!(
                "{} was written by a group of {} processes, reading on {}.",
                path,
                record.num_procs,
                comm.size()
            )));
        }

        info!("Read {} x {} block from {}.", record.num_rows, record.num_cols, path);
        Ok(Matrix::from_storage(
            Storage::Owned(record.data.into_owned()),
            record.num_rows,
            record.num_cols,
            record.distributed,
            comm,
        ))
    }
}

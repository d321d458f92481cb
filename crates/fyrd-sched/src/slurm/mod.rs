//! SLURM integration: sbatch, squeue, sacct and scancel.

mod adapter;
mod parser;

pub use adapter::{SlurmAdapter, SlurmJobInfo, SlurmState};
pub use parser::{
    parse_queue_ids, parse_sacct_output, parse_sbatch_output, parse_scancel_output,
    parse_squeue_output,
};

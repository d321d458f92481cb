//! Torque/PBS integration: qsub, qstat and qdel.

mod adapter;
mod parser;

pub use adapter::{TorqueAdapter, TorqueJobInfo, TorqueState};
pub use parser::{
    parse_pbs_state, parse_qdel_output, parse_qstat_full_output, parse_qsub_error,
    parse_qsub_output, parse_queue_ids,
};

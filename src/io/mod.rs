//! Input and output adapters
pub mod fasta;
pub mod isoforms;
pub mod raw_params;
pub mod sam;
pub mod store;

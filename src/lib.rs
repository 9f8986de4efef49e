//! Estimation of GC dependent PCR amplification efficiencies, fragment size
//! distributions and expression levels from paired-end RNA-Seq alignments.
pub mod config;
pub mod context;
pub mod error;
pub mod frags;
pub mod io;
pub mod model;
pub mod pipeline;
pub mod stats;

//! Pipeline module - end to end estimation runs

pub mod effest;

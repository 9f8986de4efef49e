//! Estimation stages that run on aggregated fragment counts
pub mod efficiency;
pub mod fragdist;
pub mod levels;
pub mod optimize;

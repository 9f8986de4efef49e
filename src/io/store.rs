//! Versioned JSON records for fragment counts and the GC prior.
//!
//! Matrices are stored row by row. Loading rebuilds the in-memory types
//! through their constructors, so totals and marginals are always derived
//! from the stored matrix.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{EffestError, Result};
use crate::frags::aggregate::{ExpressionCounts, FragCounts};
use crate::frags::prior::GcPrior;
use crate::frags::GC_BINS;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountsRecord {
    pub schema_version: u32,
    pub min_size: usize,
    pub max_size: usize,
    /// Joint count matrix, one row per fragment size starting at 0
    pub frag_mat: Vec<Vec<f64>>,
    pub expr_levels: ExpressionCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorRecord {
    pub schema_version: u32,
    pub prior: Vec<Vec<f64>>,
    pub gc_marg: Vec<f64>,
}

fn matrix_rows(mat: &Array2<f64>) -> Vec<Vec<f64>> {
    mat.rows().into_iter().map(|row| row.to_vec()).collect()
}

fn rows_to_matrix(rows: &[Vec<f64>], what: &str) -> Result<Array2<f64>> {
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != GC_BINS) {
        return Err(EffestError::Schema(format!(
            "{} row {} has {} GC columns, expected {}",
            what,
            i,
            row.len(),
            GC_BINS
        )));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), GC_BINS), flat)
        .map_err(|e| EffestError::Schema(format!("{}: {}", what, e)))
}

fn check_version(version: u32, what: &str) -> Result<()> {
    if version != SCHEMA_VERSION {
        return Err(EffestError::Schema(format!(
            "{} record has schema version {}, this build reads version {}",
            what, version, SCHEMA_VERSION
        )));
    }
    Ok(())
}

impl CountsRecord {
    pub fn from_counts(counts: &FragCounts) -> Self {
        CountsRecord {
            schema_version: SCHEMA_VERSION,
            min_size: counts.min_size,
            max_size: counts.max_size,
            frag_mat: matrix_rows(&counts.frag_mat),
            expr_levels: counts.expr_levels.clone(),
        }
    }

    pub fn into_counts(self) -> Result<FragCounts> {
        check_version(self.schema_version, "counts")?;
        let frag_mat = rows_to_matrix(&self.frag_mat, "joint count matrix")?;
        FragCounts::new(frag_mat, self.min_size, self.max_size, self.expr_levels)
    }
}

impl PriorRecord {
    pub fn from_prior(prior: &GcPrior) -> Self {
        PriorRecord {
            schema_version: SCHEMA_VERSION,
            prior: matrix_rows(&prior.prior),
            gc_marg: prior.gc_marg.to_vec(),
        }
    }

    pub fn into_prior(self) -> Result<GcPrior> {
        check_version(self.schema_version, "prior")?;
        let prior = rows_to_matrix(&self.prior, "GC prior")?;
        if self.gc_marg.len() != GC_BINS {
            return Err(EffestError::Schema(format!(
                "GC prior marginal has {} buckets, expected {}",
                self.gc_marg.len(),
                GC_BINS
            )));
        }
        Ok(GcPrior {
            prior,
            gc_marg: Array1::from(self.gc_marg),
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| EffestError::io(e, path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|e| EffestError::io(e, path))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| EffestError::io(e, path))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn save_counts(path: &Path, counts: &FragCounts) -> Result<()> {
    write_json(path, &CountsRecord::from_counts(counts))
}

pub fn load_counts(path: &Path) -> Result<FragCounts> {
    read_json::<CountsRecord>(path)?.into_counts()
}

pub fn save_prior(path: &Path, prior: &GcPrior) -> Result<()> {
    write_json(path, &PriorRecord::from_prior(prior))
}

pub fn load_prior(path: &Path) -> Result<GcPrior> {
    read_json::<PriorRecord>(path)?.into_prior()
}

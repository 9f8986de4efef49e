use crate::error::{EffestError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Pool efficiency assumed when no reference point is given.
pub const DEFAULT_MEAN_EFF: f64 = 0.87;

/// The single point that anchors the absolute efficiency scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EfficiencyReference {
    /// Assumed mean efficiency of the pool.
    Mean(f64),
    /// Assumed efficiency of the best amplified GC bucket.
    Max(f64),
}

impl EfficiencyReference {
    /// Resolve the reference point from the two optional command line values.
    ///
    /// A value of zero counts as "not given". Supplying both is rejected and
    /// supplying neither falls back to [`DEFAULT_MEAN_EFF`].
    pub fn resolve(mean_eff: Option<f64>, max_eff: Option<f64>) -> Result<Self> {
        let mean_eff = mean_eff.filter(|&m| m != 0.0);
        let max_eff = max_eff.filter(|&m| m != 0.0);

        let reference = match (mean_eff, max_eff) {
            (Some(_), Some(_)) => {
                return Err(EffestError::Config(
                    "mean efficiency and maximum efficiency are mutually exclusive".to_string(),
                ))
            }
            (Some(m), None) => EfficiencyReference::Mean(m),
            (None, Some(m)) => EfficiencyReference::Max(m),
            (None, None) => EfficiencyReference::Mean(DEFAULT_MEAN_EFF),
        };
        reference.validate()?;
        Ok(reference)
    }

    pub fn value(&self) -> f64 {
        match *self {
            EfficiencyReference::Mean(v) | EfficiencyReference::Max(v) => v,
        }
    }

    fn validate(&self) -> Result<()> {
        let v = self.value();
        if !(v.is_finite() && v > 0.0 && v < 1.0) {
            return Err(EffestError::Config(format!(
                "efficiency reference point must lie in (0, 1), got {}",
                v
            )));
        }
        Ok(())
    }
}

impl fmt::Display for EfficiencyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EfficiencyReference::Mean(v) => write!(f, "Assumed mean efficiency: {}", v),
            EfficiencyReference::Max(v) => write!(f, "Assumed maximum efficiency: {}", v),
        }
    }
}

/// Distribution family used for the fragment size model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragSizeFamily {
    TruncatedNormal,
    SkewNormal,
    /// Fit both and keep the one with the lower AIC.
    Auto,
}

impl FromStr for FragSizeFamily {
    type Err = EffestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "n" => Ok(FragSizeFamily::TruncatedNormal),
            "sn" => Ok(FragSizeFamily::SkewNormal),
            "auto" => Ok(FragSizeFamily::Auto),
            other => Err(EffestError::Config(format!(
                "Invalid distribution type specified for fragment size distribution: {}",
                other
            ))),
        }
    }
}

/// Validated settings for one estimation run.
#[derive(Debug, Clone)]
pub struct EffestConfig {
    /// Name sorted SAM or BAM input, `-` for SAM on stdin.
    pub input: Option<String>,
    pub ref_fasta: Option<PathBuf>,
    pub iso_list: Option<PathBuf>,
    pub nr_cycles: u32,
    pub reference: EfficiencyReference,
    pub dist_family: FragSizeFamily,
    pub out_fasta: Option<PathBuf>,
    pub out_json: PathBuf,
    pub expr_mul: f64,
    pub save_uncorrected: bool,
    pub trim: bool,
    pub window_step: usize,
    pub out_counts: Option<PathBuf>,
    pub in_counts: Option<PathBuf>,
    pub out_prior: Option<PathBuf>,
    pub in_prior: Option<PathBuf>,
    pub min_qual: u8,
    pub init_params: (f64, f64),
}

impl Default for EffestConfig {
    fn default() -> Self {
        EffestConfig {
            input: None,
            ref_fasta: None,
            iso_list: None,
            nr_cycles: 11,
            reference: EfficiencyReference::Mean(DEFAULT_MEAN_EFF),
            dist_family: FragSizeFamily::Auto,
            out_fasta: None,
            out_json: PathBuf::from("raw_params.json"),
            expr_mul: 10000.0,
            save_uncorrected: false,
            trim: true,
            window_step: 5,
            out_counts: Some(PathBuf::from("effest_counts.json")),
            in_counts: None,
            out_prior: Some(PathBuf::from("effest_prior.json")),
            in_prior: None,
            min_qual: 0,
            init_params: (1.0, 0.5),
        }
    }
}

impl EffestConfig {
    /// Check the cross-field input contract.
    pub fn validate(&self) -> Result<()> {
        if self.input.is_none() && self.in_counts.is_none() {
            return Err(EffestError::Config(
                "No input alignment file or fragment count file specified!".to_string(),
            ));
        }
        if self.ref_fasta.is_none() && (self.in_counts.is_none() || self.in_prior.is_none()) {
            return Err(EffestError::Config("Reference fasta not specified!".to_string()));
        }
        if self.nr_cycles == 0 {
            return Err(EffestError::Config("Number of PCR cycles must be positive".to_string()));
        }
        if self.window_step == 0 {
            return Err(EffestError::Config(
                "Sliding window step ratio must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reference() {
        assert_eq!(
            EfficiencyReference::resolve(None, None).unwrap(),
            EfficiencyReference::Mean(0.87)
        );
        assert_eq!(
            EfficiencyReference::resolve(Some(0.0), Some(0.95)).unwrap(),
            EfficiencyReference::Max(0.95)
        );
        assert_eq!(
            EfficiencyReference::resolve(Some(0.8), Some(0.0)).unwrap(),
            EfficiencyReference::Mean(0.8)
        );
        assert!(EfficiencyReference::resolve(Some(0.8), Some(0.9)).is_err());
        assert!(EfficiencyReference::resolve(Some(1.5), None).is_err());
        assert!(EfficiencyReference::resolve(None, Some(-0.2)).is_err());
    }

    #[test]
    fn test_family_tokens() {
        assert_eq!("n".parse::<FragSizeFamily>().unwrap(), FragSizeFamily::TruncatedNormal);
        assert_eq!("sn".parse::<FragSizeFamily>().unwrap(), FragSizeFamily::SkewNormal);
        assert_eq!("auto".parse::<FragSizeFamily>().unwrap(), FragSizeFamily::Auto);
        assert!("gamma".parse::<FragSizeFamily>().is_err());
    }

    #[test]
    fn test_validate_inputs() {
        let mut config = EffestConfig::default();
        assert!(config.validate().is_err());

        config.input = Some("aln.sam".to_string());
        assert!(config.validate().is_err());

        config.ref_fasta = Some(PathBuf::from("ref.fa"));
        assert!(config.validate().is_ok());

        config.window_step = 0;
        assert!(config.validate().is_err());
    }
}

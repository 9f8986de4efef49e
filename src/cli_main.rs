use std::path::PathBuf;

use clap::Parser;

use effest::config::{EffestConfig, EfficiencyReference, FragSizeFamily};
use effest::error::Result;

#[derive(Parser, Debug)]
#[command(
    name = "effest",
    version,
    about = "Estimate GC-dependent fragment amplification efficiencies and fragment size distribution from paired-end RNA-seq data mapped to transcriptome",
    long_about = None
)]
pub struct Cli {
    /// Aligned paired end reads sorted by name, SAM (`-` for stdin) or BAM
    pub input: Option<String>,

    /// Reference fasta
    #[arg(short = 'f')]
    pub ref_fasta: Option<PathBuf>,

    /// List of single isoform transcripts
    #[arg(short = 'i')]
    pub iso_list: Option<PathBuf>,

    /// Number of PCR cycles
    #[arg(short = 'c', default_value_t = 11)]
    pub nr_cycles: u32,

    /// Assumed pool efficiency (0.87 when no reference point is given)
    #[arg(short = 'm')]
    pub mean_eff: Option<f64>,

    /// Assumed maximum efficiency
    #[arg(short = 'M')]
    pub max_eff: Option<f64>,

    /// Distribution to model fragment size distribution (n|sn|auto)
    #[arg(short = 'd', default_value = "auto")]
    pub dist_family: String,

    /// Output fasta
    #[arg(short = 'g')]
    pub out_fasta: Option<PathBuf>,

    /// File to store estimated raw parameters
    #[arg(short = 'j', default_value = "raw_params.json")]
    pub out_json: PathBuf,

    /// Expression level multiplier
    #[arg(short = 'e', default_value_t = 10000.0)]
    pub expr_mul: f64,

    /// Save the uncorrected expression levels as well
    #[arg(short = 'u')]
    pub save_uncorrected: bool,

    /// Trim off old expression values
    #[arg(short = 't', default_value_t = true, action = clap::ArgAction::Set)]
    pub trim: bool,

    /// Sliding window size / step size ratio
    #[arg(short = 'w', default_value_t = 5)]
    pub window_step: usize,

    /// Save counts to the specified file
    #[arg(short = 's', default_value = "effest_counts.json")]
    pub out_counts: PathBuf,

    /// Load counts from the specified file
    #[arg(short = 'k')]
    pub in_counts: Option<PathBuf>,

    /// Save fragment prior to the specified file
    #[arg(short = 'p', default_value = "effest_prior.json")]
    pub out_prior: PathBuf,

    /// Load fragment prior from the specified file
    #[arg(short = 'o')]
    pub in_prior: Option<PathBuf>,

    /// Minimum mapping quality
    #[arg(short = 'q', default_value_t = 0)]
    pub min_qual: u8,

    /// Initial value of the efficiency curve shape parameter
    #[arg(long, default_value_t = 1.0)]
    pub init_a: f64,

    /// Initial value of the efficiency curve floor parameter
    #[arg(long, default_value_t = 0.5)]
    pub init_b: f64,

    /// Toggle verbose mode
    #[arg(short = 'v')]
    pub verbose: bool,
}

impl Cli {
    /// Resolve and validate the run configuration
    pub fn into_config(self) -> Result<EffestConfig> {
        let config = EffestConfig {
            input: self.input,
            ref_fasta: self.ref_fasta,
            iso_list: self.iso_list,
            nr_cycles: self.nr_cycles,
            reference: EfficiencyReference::resolve(self.mean_eff, self.max_eff)?,
            dist_family: self.dist_family.parse::<FragSizeFamily>()?,
            out_fasta: self.out_fasta,
            out_json: self.out_json,
            expr_mul: self.expr_mul,
            save_uncorrected: self.save_uncorrected,
            trim: self.trim,
            window_step: self.window_step,
            out_counts: Some(self.out_counts),
            in_counts: self.in_counts,
            out_prior: Some(self.out_prior),
            in_prior: self.in_prior,
            min_qual: self.min_qual,
            init_params: (self.init_a, self.init_b),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["effest", "aln.sam", "-f", "ref.fas"]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.nr_cycles, 11);
        assert_eq!(config.reference, EfficiencyReference::Mean(0.87));
        assert_eq!(config.dist_family, FragSizeFamily::Auto);
        assert_eq!(config.out_json, PathBuf::from("raw_params.json"));
        assert!(config.trim);
        assert_eq!(config.window_step, 5);
    }

    #[test]
    fn test_rejects_both_reference_points() {
        let cli = Cli::parse_from(["effest", "aln.sam", "-f", "ref.fas", "-m", "0.8", "-M", "0.9"]);
        assert!(cli.into_config().is_err());

        let cli = Cli::parse_from(["effest", "aln.sam", "-f", "ref.fas", "-M", "0.9", "-d", "sn"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.reference, EfficiencyReference::Max(0.9));
        assert_eq!(config.dist_family, FragSizeFamily::SkewNormal);
    }

    #[test]
    fn test_rejects_unknown_family() {
        let cli = Cli::parse_from(["effest", "aln.sam", "-f", "ref.fas", "-d", "gamma"]);
        assert!(cli.into_config().is_err());
    }
}

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::EffestConfig;
use crate::context::RunContext;
use crate::error::Result;
use crate::frags::aggregate::{FilterStats, FragCounts, FragmentAggregator};
use crate::frags::prior::{GcPrior, GcPriorEstimator};
use crate::io::fasta::{default_expr_path, load_reference, ExprFastaWriter, Reference};
use crate::io::isoforms::SingleIsoformList;
use crate::io::raw_params::RawParams;
use crate::io::sam::{open_alignment, SamPairReader};
use crate::io::store;
use crate::model::efficiency::EfficiencyModel;
use crate::model::fragdist::{fit_fragdist, FragDistFit};
use crate::model::levels::ExpressionLevels;

/// Everything one estimation run produced
#[derive(Debug)]
pub struct EffestOutcome {
    pub counts: FragCounts,
    /// Only present when the counts were aggregated from an alignment
    pub filter_stats: Option<FilterStats>,
    pub prior: GcPrior,
    pub efficiency: EfficiencyModel,
    pub frag_dist: FragDistFit,
    pub levels: Option<ExpressionLevels>,
    pub suggestions: Vec<String>,
}

/// Name of the uncorrected level file next to the corrected one:
/// `sample_expr.fas` becomes `sample_expr_uncorr.fas`.
pub fn uncorrected_path(out_fasta: &Path) -> PathBuf {
    let stem = out_fasta
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match out_fasta.extension() {
        Some(ext) => format!("{}_uncorr.{}", stem, ext.to_string_lossy()),
        None => format!("{}_uncorr", stem),
    };
    out_fasta.with_file_name(name)
}

fn build_counts(
    config: &EffestConfig,
    reference: Option<&Reference>,
    isoforms: &SingleIsoformList,
    ctx: &RunContext,
) -> Result<(FragCounts, Option<FilterStats>)> {
    if let Some(path) = &config.in_counts {
        ctx.vlog(&format!("Loading fragment counts from file: {}", path.display()));
        let counts = store::load_counts(path).map_err(|e| ctx.fatal_err(e))?;
        return Ok((counts, None));
    }

    let input = config
        .input
        .as_deref()
        .ok_or_else(|| ctx.fatal("No input alignment file or fragment count file specified!"))?;
    let reference = reference.ok_or_else(|| ctx.fatal("Reference fasta not specified!"))?;

    ctx.vlog(&format!("Parsing fragments from file: {}", input));
    let reader = SamPairReader::new(open_alignment(input)?);
    let aggregator = FragmentAggregator::new(reference, isoforms, config.min_qual, ctx);
    let (counts, stats) = aggregator.aggregate(reader)?;

    if let Some(path) = &config.out_counts {
        ctx.vlog(&format!("Saving fragment counts to file: {}", path.display()));
        store::save_counts(path, &counts)?;
    }
    Ok((counts, Some(stats)))
}

fn build_prior(
    config: &EffestConfig,
    counts: &FragCounts,
    reference: Option<&Reference>,
    isoforms: &SingleIsoformList,
    ctx: &RunContext,
) -> Result<GcPrior> {
    if let Some(path) = &config.in_prior {
        ctx.vlog(&format!("Loading fragment prior from file: {}", path.display()));
        return store::load_prior(path).map_err(|e| ctx.fatal_err(e));
    }

    let reference = reference.ok_or_else(|| ctx.fatal("Reference fasta not specified!"))?;
    let prior = GcPriorEstimator::new(counts, isoforms, reference, config.window_step, ctx).estimate()?;

    if let Some(path) = &config.out_prior {
        ctx.vlog(&format!("Saving fragment prior to file: {}", path.display()));
        store::save_prior(path, &prior)?;
    }
    Ok(prior)
}

fn write_levels(path: &Path, reference: &Reference, levels: &[(String, u64)], trim: bool, ctx: &RunContext) -> Result<()> {
    ctx.vlog(&format!("Saving estimated expression levels to file: {}", path.display()));
    let mut writer = ExprFastaWriter::create(path, trim).map_err(|e| ctx.fatal_err(e))?;
    for ((name, seq), (_, level)) in reference.iter().zip(levels) {
        writer.write_record(name, *level, seq)?;
    }
    writer.finish()
}

/// Run the whole estimation: counts, prior, efficiency model, size model
/// and expression levels.
///
/// # Arguments
/// * `config` - validated run configuration
/// * `ctx` - report sink shared by every stage
pub fn run(config: &EffestConfig, ctx: &RunContext) -> Result<EffestOutcome> {
    let start_time = Instant::now();
    config.validate().map_err(|e| ctx.fatal_err(e))?;
    ctx.vlog(&config.reference.to_string());

    let reference = match &config.ref_fasta {
        Some(path) => {
            ctx.vlog(&format!("Loading reference sequences from file: {}", path.display()));
            let reference = load_reference(path).map_err(|e| ctx.fatal_err(e))?;
            ctx.vlog(&format!("Loaded {} reference sequences", reference.len()));
            Some(reference)
        }
        None => None,
    };
    let isoforms = match &config.iso_list {
        Some(path) => SingleIsoformList::load(path).map_err(|e| ctx.fatal_err(e))?,
        None => SingleIsoformList::all(),
    };
    if let Some(n) = isoforms.size() {
        ctx.vlog(&format!("Single isoform transcripts listed: {}", n));
    }

    // Existing expression output is never overwritten
    let out_fasta = match (&config.out_fasta, &config.ref_fasta) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(ref_path)) => Some(default_expr_path(ref_path)),
        (None, None) => None,
    };
    if let (Some(path), Some(_)) = (&out_fasta, &reference) {
        let mut targets = vec![path.clone()];
        if config.save_uncorrected {
            targets.push(uncorrected_path(path));
        }
        if let Some(existing) = targets.iter().find(|p| p.exists()) {
            return Err(ctx.fatal(&format!(
                "Output fasta file {} already exists! Aborting!",
                existing.display()
            )));
        }
    }

    let (counts, filter_stats) = build_counts(config, reference.as_ref(), &isoforms, ctx)?;
    let prior = build_prior(config, &counts, reference.as_ref(), &isoforms, ctx)?;

    let efficiency = EfficiencyModel::fit(
        &counts,
        &prior,
        config.nr_cycles,
        config.reference,
        config.init_params,
        ctx,
    )?;
    let frag_dist = fit_fragdist(&counts, config.dist_family, ctx)?;

    let suggestions = vec![efficiency.suggestion(), frag_dist.selected.suggestion()];
    println!("Suggested rlsim parameters:");
    for s in &suggestions {
        println!("\t{}", s);
    }

    let mut rj = RawParams::new();
    rj.add_frag_counts(&counts);
    rj.add_efficiency(&efficiency);
    rj.add_frag_size_model(&frag_dist);
    rj.add_suggestions(&suggestions);
    ctx.vlog(&format!("Saving raw parameters to file: {}", config.out_json.display()));
    rj.save(&config.out_json)?;

    let levels = match (&reference, &out_fasta) {
        (Some(reference), Some(path)) => {
            let levels = ExpressionLevels::estimate(
                reference,
                &counts.expr_levels,
                config.nr_cycles,
                &efficiency.ppr,
                config.expr_mul,
                ctx,
            );
            write_levels(path, reference, &levels.corrected, config.trim, ctx)?;
            if config.save_uncorrected {
                write_levels(&uncorrected_path(path), reference, &levels.flat, config.trim, ctx)?;
            }
            let summary = levels.corrected_summary();
            ctx.vlog(&format!(
                "Expression levels: {} transcripts, {} at zero, median {}, max {}",
                summary.transcripts, summary.zero_levels, summary.median, summary.max
            ));
            Some(levels)
        }
        _ => None,
    };

    ctx.log(&format!("Estimation finished in {:.2?}", start_time.elapsed()));
    Ok(EffestOutcome {
        counts,
        filter_stats,
        prior,
        efficiency,
        frag_dist,
        levels,
        suggestions,
    })
}

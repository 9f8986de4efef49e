//! Raw parameter file read by the simulator.
//!
//! Keys keep insertion order. Series are written as objects keyed by the
//! decimal index, e.g. `"frag_dist": {"0": 0.0, "1": 0.0, ...}`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::error::{EffestError, Result};
use crate::frags::aggregate::FragCounts;
use crate::model::efficiency::EfficiencyModel;
use crate::model::fragdist::FragDistFit;

/// Ordered collection of named JSON values
#[derive(Debug, Clone, Default)]
pub struct RawParams {
    pool: Map<String, Value>,
}

impl RawParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_obj<V: Into<Value>>(&mut self, name: &str, value: V) {
        self.pool.insert(name.to_string(), value.into());
    }

    /// Store a series as `{index: value}`
    pub fn add_series<'a, I>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let series: Map<String, Value> = values
            .into_iter()
            .enumerate()
            .map(|(i, &v)| (i.to_string(), json!(v)))
            .collect();
        self.pool.insert(name.to_string(), Value::Object(series));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.pool.get(name)
    }

    pub fn add_frag_counts(&mut self, frags: &FragCounts) {
        self.add_obj("nr_frags", frags.all_frags());
        self.add_series("frag_dist", frags.size_counts().iter());
    }

    pub fn add_efficiency(&mut self, model: &EfficiencyModel) {
        self.add_obj("nr_cycles", model.nr_cycles);
        self.add_series("gc_eff", model.ppr.iter());
        self.add_obj(
            "gc_eff_params",
            json!({
                "a": model.params.0,
                "b": model.params.1,
                "max_eff": model.max_fitted_eff(),
                "converged": model.fit.converged,
            }),
        );
    }

    pub fn add_frag_size_model(&mut self, fit: &FragDistFit) {
        let selected = &fit.selected;
        let mut model = json!({
            "family": selected.family(),
            "params": selected.params(),
            "log_lik": selected.log_lik(),
            "aic": selected.aic(),
        });
        if let (Some(n), Some(sn)) = (&fit.trunc_normal, &fit.skew_normal) {
            model["aic_truncated_normal"] = json!(n.aic());
            model["aic_skew_normal"] = json!(sn.aic());
        }
        self.add_obj("frag_size_model", model);
    }

    pub fn add_suggestions(&mut self, suggestions: &[String]) {
        self.add_obj("suggestions", suggestions.to_vec());
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| EffestError::io(e, path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.pool)?;
        writer.flush().map_err(|e| EffestError::io(e, path))?;
        Ok(())
    }
}

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{EffestError, Result};

/// Transcripts treated as isoform-unambiguous.
///
/// Without a list every transcript passes.
#[derive(Debug, Clone, Default)]
pub struct SingleIsoformList {
    names: Option<HashSet<String>>,
}

impl SingleIsoformList {
    /// Oracle that accepts every transcript
    pub fn all() -> Self {
        SingleIsoformList { names: None }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SingleIsoformList {
            names: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    /// Read one transcript name per line, trailing whitespace removed
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut names = HashSet::new();
        for line in reader.lines() {
            let line = line?;
            let name = line.trim_end();
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
        Ok(SingleIsoformList { names: Some(names) })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| EffestError::io(e, path))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn single_isoform(&self, name: &str) -> bool {
        match &self.names {
            None => true,
            Some(names) => names.contains(name),
        }
    }

    /// Number of listed transcripts, `None` when no list was given
    pub fn size(&self) -> Option<usize> {
        self.names.as_ref().map(|n| n.len())
    }
}

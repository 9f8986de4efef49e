// src/io/fasta.rs
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bio::io::fasta;
use flate2::read::MultiGzDecoder;

use crate::error::{EffestError, Result};

/// Open a FASTA file for reading, handles gzipped files automatically
pub fn open_fasta(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| EffestError::io(e, path))?;
    if path.extension().map_or(false, |ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Reference transcript sequences, kept in file order.
#[derive(Debug, Clone, Default)]
pub struct Reference {
    names: Vec<String>,
    seqs: HashMap<String, String>,
}

impl Reference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sequence, uppercased. A repeated name replaces the earlier sequence.
    pub fn insert(&mut self, name: &str, seq: &str) {
        if !self.seqs.contains_key(name) {
            self.names.push(name.to_string());
        }
        self.seqs.insert(name.to_string(), seq.to_ascii_uppercase());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.seqs.get(name).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate over `(name, sequence)` in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names
            .iter()
            .map(move |n| (n.as_str(), self.seqs[n].as_str()))
    }
}

/// Read every record of a FASTA stream into memory
pub fn read_reference<R: std::io::Read>(reader: R) -> Result<Reference> {
    let mut reference = Reference::new();
    for record in fasta::Reader::new(reader).records() {
        let record = record?;
        let seq = std::str::from_utf8(record.seq())
            .map_err(|e| EffestError::Fatal(format!("non UTF-8 sequence in {}: {}", record.id(), e)))?;
        reference.insert(record.id(), seq);
    }
    Ok(reference)
}

/// Slurp the reference transcriptome from a (possibly gzipped) FASTA file
pub fn load_reference(path: &Path) -> Result<Reference> {
    let reader = open_fasta(path)?;
    read_reference(reader).map_err(|e| match e {
        EffestError::Io { source, .. } => EffestError::io(source, path),
        other => other,
    })
}

/// Writes transcripts with the expression level appended to the name,
/// `>name$level`, the header layout the read simulator expects.
pub struct ExprFastaWriter<W: Write = BufWriter<File>> {
    writer: W,
    path: PathBuf,
    trim: bool,
}

impl ExprFastaWriter {
    /// Create the output file. An existing file is never overwritten.
    pub fn create(path: &Path, trim: bool) -> Result<Self> {
        if path.exists() {
            return Err(EffestError::Fatal(format!(
                "Output fasta file {} already exists! Aborting!",
                path.display()
            )));
        }
        let file = File::create(path).map_err(|e| EffestError::io(e, path))?;
        Ok(ExprFastaWriter::new(BufWriter::new(file), path, trim))
    }
}

impl<W: Write> ExprFastaWriter<W> {
    /// Wrap an open writer; `path` names the destination in errors.
    pub fn new(writer: W, path: impl Into<PathBuf>, trim: bool) -> Self {
        ExprFastaWriter {
            writer,
            path: path.into(),
            trim,
        }
    }

    pub fn write_record(&mut self, name: &str, level: u64, sequence: &str) -> Result<()> {
        writeln!(self.writer, ">{}${}\n{}\n", trim_name(name, self.trim), level, sequence)
            .map_err(|e| EffestError::io(e, &self.path))
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(|e| EffestError::io(e, &self.path))
    }
}

/// Strip an expression level left over from an earlier run.
pub fn trim_name(name: &str, trim: bool) -> &str {
    if !trim {
        return name;
    }
    name.split('$').next().unwrap_or(name)
}

/// Default output name: the reference base name with `_expr.fas` appended.
pub fn default_expr_path(ref_fasta: &Path) -> PathBuf {
    let base = ref_fasta
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = base.split(".fas").next().unwrap_or(&base).to_string();
    std::path::PathBuf::from(format!("{}_expr.fas", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_read_reference_uppercases() {
        let data = ">tr1 some description\nacgtAC\nGT\n>tr2\nGGGG\n";
        let reference = read_reference(Cursor::new(data)).unwrap();

        assert_eq!(reference.len(), 2);
        assert_eq!(reference.get("tr1"), Some("ACGTACGT"));
        assert_eq!(reference.get("tr2"), Some("GGGG"));
        let names: Vec<&str> = reference.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["tr1", "tr2"]);
    }

    #[test]
    fn test_trim_name() {
        assert_eq!(trim_name("tr1$120", true), "tr1");
        assert_eq!(trim_name("tr1$120", false), "tr1$120");
        assert_eq!(trim_name("tr1", true), "tr1");
    }

    #[test]
    fn test_default_expr_path() {
        assert_eq!(
            default_expr_path(Path::new("/data/ref.fasta.gz")),
            PathBuf::from("ref_expr.fas")
        );
    }

    #[test]
    fn test_writer_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.fas");

        let mut writer = ExprFastaWriter::create(&path, true).unwrap();
        writer.write_record("tr1$5", 42, "ACGT").unwrap();
        writer.finish().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, ">tr1$42\nACGT\n\n");
        assert!(ExprFastaWriter::create(&path, true).is_err());
    }

    struct FullDevice;

    impl Write for FullDevice {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        }
    }

    #[test]
    fn test_write_errors_name_the_output_file() {
        let path = Path::new("levels/out.fas");
        let mut writer = ExprFastaWriter::new(FullDevice, path, true);
        match writer.write_record("tr1", 1, "ACGT") {
            Err(EffestError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result: {:?}", other),
        }
        match writer.finish() {
            Err(EffestError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

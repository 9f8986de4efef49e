use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use noodles::{bam, sam};
use sam::alignment::record::Flags;
use sam::alignment::RecordBuf;

use crate::error::{EffestError, Result};

/// MAPQ reported when the record carries 255 (unavailable)
const MISSING_MAPQ: u8 = 255;

/// Half-open, zero based interval on a reference sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

/// One mate of a read pair as seen in the alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMate {
    pub aligned: bool,
    pub paired_end: bool,
    pub proper_pair: bool,
    pub mapping_quality: u8,
    pub reference_name: String,
    pub interval: Interval,
}

/// Both mates of a read name; a mate may be missing from the input.
#[derive(Debug, Clone, PartialEq)]
pub struct MatePair {
    pub first: Option<AlignedMate>,
    pub second: Option<AlignedMate>,
}

/// Header-aware stream of alignment records, SAM or BAM.
pub trait AlignmentSource {
    fn header(&self) -> &sam::Header;

    /// Read the next record into `record`. Returns 0 at end of input.
    fn read_record(&mut self, record: &mut RecordBuf) -> io::Result<usize>;
}

impl<S: AlignmentSource + ?Sized> AlignmentSource for Box<S> {
    fn header(&self) -> &sam::Header {
        (**self).header()
    }

    fn read_record(&mut self, record: &mut RecordBuf) -> io::Result<usize> {
        (**self).read_record(record)
    }
}

fn read_error(err: io::Error, record: usize) -> EffestError {
    if err.kind() == io::ErrorKind::InvalidData {
        EffestError::Sam {
            record,
            msg: err.to_string(),
        }
    } else {
        err.into()
    }
}

/// SAM text input
pub struct SamSource<R> {
    reader: sam::io::Reader<R>,
    header: sam::Header,
}

impl<R: BufRead> SamSource<R> {
    pub fn new(inner: R) -> Result<Self> {
        let mut reader = sam::io::Reader::new(inner);
        let header = reader.read_header().map_err(|e| read_error(e, 0))?;
        Ok(SamSource { reader, header })
    }
}

impl<R: BufRead> AlignmentSource for SamSource<R> {
    fn header(&self) -> &sam::Header {
        &self.header
    }

    fn read_record(&mut self, record: &mut RecordBuf) -> io::Result<usize> {
        self.reader.read_record_buf(&self.header, record)
    }
}

/// BGZF compressed BAM input
pub struct BamSource<R> {
    reader: bam::io::Reader<R>,
    header: sam::Header,
}

impl<R: Read> BamSource<R> {
    pub fn from_reader(mut reader: bam::io::Reader<R>) -> Result<Self> {
        let header = reader.read_header().map_err(|e| read_error(e, 0))?;
        Ok(BamSource { reader, header })
    }
}

impl<R: Read> AlignmentSource for BamSource<R> {
    fn header(&self) -> &sam::Header {
        &self.header
    }

    fn read_record(&mut self, record: &mut RecordBuf) -> io::Result<usize> {
        self.reader.read_record_buf(&self.header, record)
    }
}

/// Open an alignment for reading: `-` is SAM on stdin, a `.bam` extension
/// selects BAM, anything else is read as SAM text.
pub fn open_alignment(input: &str) -> Result<Box<dyn AlignmentSource>> {
    if input == "-" {
        return Ok(Box::new(SamSource::new(BufReader::new(io::stdin()))?));
    }
    let file = File::open(input).map_err(|e| EffestError::io(e, input))?;
    let is_bam = Path::new(input)
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("bam"));
    if is_bam {
        Ok(Box::new(BamSource::from_reader(bam::io::Reader::new(file))?))
    } else {
        Ok(Box::new(SamSource::new(BufReader::new(file))?))
    }
}

struct NamedMate {
    qname: String,
    flags: Flags,
    mate: AlignedMate,
}

fn to_mate(header: &sam::Header, record: &RecordBuf) -> NamedMate {
    let flags = record.flags();
    let reference_name = record
        .reference_sequence_id()
        .and_then(|id| header.reference_sequences().get_index(id))
        .map(|(name, _)| name.to_string());
    let start = record
        .alignment_start()
        .map(|pos| pos.get() - 1)
        .unwrap_or(0);

    NamedMate {
        qname: record.name().map(|n| n.to_string()).unwrap_or_default(),
        flags,
        mate: AlignedMate {
            aligned: !flags.is_unmapped() && reference_name.is_some(),
            paired_end: flags.is_segmented(),
            proper_pair: flags.is_properly_segmented(),
            mapping_quality: record
                .mapping_quality()
                .map(|mq| mq.get())
                .unwrap_or(MISSING_MAPQ),
            reference_name: reference_name.unwrap_or_else(|| "*".to_string()),
            interval: Interval {
                start,
                end: start + record.cigar().alignment_span(),
            },
        },
    }
}

/// Streams mate pairs from an alignment sorted by read name.
///
/// Consecutive records sharing a QNAME form one pair. Secondary and
/// supplementary alignments are skipped.
pub struct SamPairReader<S> {
    source: S,
    record: RecordBuf,
    records_read: usize,
    pending: Option<NamedMate>,
    done: bool,
}

impl<S: AlignmentSource> SamPairReader<S> {
    pub fn new(source: S) -> Self {
        SamPairReader {
            source,
            record: RecordBuf::default(),
            records_read: 0,
            pending: None,
            done: false,
        }
    }

    fn next_record(&mut self) -> Option<Result<NamedMate>> {
        loop {
            match self.source.read_record(&mut self.record) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(read_error(e, self.records_read + 1))),
            }
            self.records_read += 1;
            let flags = self.record.flags();
            if flags.is_secondary() || flags.is_supplementary() {
                continue;
            }
            return Some(Ok(to_mate(self.source.header(), &self.record)));
        }
    }

    fn assemble(records: Vec<NamedMate>) -> MatePair {
        let mut pair = MatePair {
            first: None,
            second: None,
        };
        for rec in records {
            let (first_segment, last_segment) = (rec.flags.is_first_segment(), rec.flags.is_last_segment());
            let slot = if last_segment && !first_segment {
                &mut pair.second
            } else if first_segment || pair.first.is_none() {
                &mut pair.first
            } else {
                &mut pair.second
            };
            if slot.is_none() {
                *slot = Some(rec.mate);
            }
        }
        pair
    }
}

impl<S: AlignmentSource> Iterator for SamPairReader<S> {
    type Item = Result<MatePair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let head = match self.pending.take() {
            Some(rec) => rec,
            None => match self.next_record()? {
                Ok(rec) => rec,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            },
        };

        let mut group = vec![head];
        loop {
            match self.next_record() {
                None => break,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(rec)) => {
                    if rec.qname == group[0].qname {
                        group.push(rec);
                    } else {
                        self.pending = Some(rec);
                        break;
                    }
                }
            }
        }
        Some(Ok(Self::assemble(group)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sam::alignment::io::Write as _;
    use std::io::Cursor;
    use tempfile::tempdir;

    const SAM: &str = "@HD\tVN:1.6\tSO:queryname\n\
@SQ\tSN:tr1\tLN:1000\n\
@SQ\tSN:tr2\tLN:1000\n\
r1\t99\ttr1\t11\t60\t50M\t=\t151\t190\t*\t*\n\
r1\t147\ttr1\t151\t60\t20M5D25M5S\t=\t11\t-190\t*\t*\n\
r1\t355\ttr2\t400\t0\t50M\t=\t151\t0\t*\t*\n\
r2\t73\ttr2\t5\t3\t30M\t=\t5\t0\t*\t*\n\
r3\t77\t*\t0\t0\t*\t*\t0\t0\t*\t*\n\
r3\t141\t*\t0\t0\t*\t*\t0\t0\t*\t*\n\
r4\t163\ttr1\t301\t255\t10S30M100N10M\t=\t101\t-250\t*\t*\n\
r4\t83\ttr1\t101\t42\t50M\t=\t301\t250\t*\t*\n";

    fn read_pairs<S: AlignmentSource>(source: S) -> Vec<MatePair> {
        SamPairReader::new(source).collect::<Result<Vec<_>>>().unwrap()
    }

    fn check_pairs(pairs: &[MatePair]) {
        assert_eq!(pairs.len(), 4);

        let first = pairs[0].first.as_ref().unwrap();
        let second = pairs[0].second.as_ref().unwrap();
        assert_eq!(first.interval, Interval { start: 10, end: 60 });
        // Deletions count towards the span, soft clips do not
        assert_eq!(second.interval, Interval { start: 150, end: 200 });
        assert!(first.proper_pair && second.paired_end);
        assert_eq!(first.reference_name, "tr1");
        assert_eq!(first.mapping_quality, 60);

        // Mate of r2 is absent from the file
        assert!(pairs[1].first.is_some());
        assert!(pairs[1].second.is_none());
        assert!(!pairs[1].first.as_ref().unwrap().proper_pair);

        let unmapped = pairs[2].first.as_ref().unwrap();
        assert!(!unmapped.aligned);
        assert!(pairs[2].second.is_some());

        // Second mate listed first still lands in its own slot
        let r4_first = pairs[3].first.as_ref().unwrap();
        let r4_second = pairs[3].second.as_ref().unwrap();
        assert_eq!(r4_first.interval, Interval { start: 100, end: 150 });
        assert_eq!(r4_first.mapping_quality, 42);
        assert_eq!(r4_second.interval, Interval { start: 300, end: 440 });
        assert_eq!(r4_second.mapping_quality, 255);
    }

    #[test]
    fn test_pairs_by_name() {
        let source = SamSource::new(Cursor::new(SAM)).unwrap();
        check_pairs(&read_pairs(source));
    }

    #[test]
    fn test_bam_input_pairs_like_sam() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aln.bam");

        let mut sam_source = SamSource::new(Cursor::new(SAM)).unwrap();
        let header = sam_source.header().clone();
        {
            let mut writer = bam::io::Writer::new(File::create(&path).unwrap());
            writer.write_header(&header).unwrap();
            let mut record = RecordBuf::default();
            while sam_source.read_record(&mut record).unwrap() != 0 {
                writer.write_alignment_record(&header, &record).unwrap();
            }
        }

        let source = open_alignment(path.to_str().unwrap()).unwrap();
        check_pairs(&read_pairs(source));
    }

    #[test]
    fn test_malformed_record_reports_record_number() {
        let data = "@SQ\tSN:tr1\tLN:1000\n\
r1\t99\ttr1\t11\t60\t50M\t=\t151\t190\t*\t*\n\
r1\t147\ttr1\tNaN\t60\t50M\t=\t11\t-190\t*\t*\n";
        let source = SamSource::new(Cursor::new(data)).unwrap();
        let result: Vec<Result<MatePair>> = SamPairReader::new(source).collect();
        assert_eq!(result.len(), 1);
        match &result[0] {
            Err(EffestError::Sam { record, .. }) => assert_eq!(*record, 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_alignment_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.sam");
        match open_alignment(path.to_str().unwrap()) {
            Err(EffestError::Io { path: p, .. }) => assert_eq!(p, path),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("opened a missing file"),
        }
    }
}

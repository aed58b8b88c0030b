//! Per-file records handed to whatever persists run metadata

use std::{
    fmt,
    io::{self, Write},
    path::PathBuf,
};

use crate::{
    monitoring::{GapReport, VerifyOutcome},
    writer::SpecFile,
};

const B1M: f64 = 1_000_000.0;

/// Everything known about one captured file once it has been checked
#[derive(Debug, Clone, PartialEq)]
pub struct SpecFileRecord {
    pub index: usize,
    pub volume: usize,
    pub path: PathBuf,
    pub frames: usize,
    pub bytes: u64,
    pub outcome: VerifyOutcome,
    pub deleted: bool,
}

impl SpecFileRecord {
    pub fn new(file: &SpecFile, outcome: VerifyOutcome, deleted: bool) -> Self {
        Self {
            index: file.index,
            volume: file.volume,
            path: file.path.clone(),
            frames: file.frames,
            bytes: file.bytes,
            outcome,
            deleted,
        }
    }

    pub fn file_size_mb(&self) -> f64 {
        self.bytes as f64 / B1M
    }
}

/// Receives a record for every file that was captured and checked
pub trait MetadataSink {
    fn record(&mut self, record: &SpecFileRecord) -> io::Result<()>;
}

impl MetadataSink for Vec<SpecFileRecord> {
    fn record(&mut self, record: &SpecFileRecord) -> io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Writes each record as one `key:value,...` line, the format the run database loader parses
pub struct ReportLineSink<W> {
    out: W,
}

impl<W: Write> ReportLineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetadataSink for ReportLineSink<W> {
    fn record(&mut self, record: &SpecFileRecord) -> io::Result<()> {
        writeln!(self.out, "{}", ReportLine(record))?;
        self.out.flush()
    }
}

/// Text form of a record. Where there's no report the statistics are filled with
/// -1 (skipped), -2 (file missing) or -3 (not a whole number of frames)
pub struct ReportLine<'a>(pub &'a SpecFileRecord);

impl fmt::Display for ReportLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0;
        write!(
            f,
            "file_path:{},packets:{},file_size_mb:{:.3},",
            record.path.display(),
            record.frames,
            record.file_size_mb()
        )?;
        match &record.outcome {
            VerifyOutcome::Verified(report) => write_report(f, report)?,
            VerifyOutcome::Skipped => write_sentinel(f, -1)?,
            VerifyOutcome::NotFound => write_sentinel(f, -2)?,
            VerifyOutcome::Corrupt => write_sentinel(f, -3)?,
        }
        write!(f, ",deleted:{}", record.deleted)
    }
}

fn write_report(f: &mut fmt::Formatter<'_>, report: &GapReport) -> fmt::Result {
    write!(
        f,
        "num_dropped_packets:{},frac_of_packets_dropped:{},num_gaps:{},neg_gaps:{},mean_gap:{},std_gap:{},max_gap:{}",
        report.dropped,
        report.fraction_dropped,
        report.num_gaps,
        report.neg_gaps,
        report.mean_gap,
        report.std_gap,
        report.max_gap
    )
}

fn write_sentinel(f: &mut fmt::Formatter<'_>, v: i32) -> fmt::Result {
    write!(
        f,
        "num_dropped_packets:{v},frac_of_packets_dropped:{v},num_gaps:{v},neg_gaps:{v},mean_gap:{v},std_gap:{v},max_gap:{v}",
        v = v
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: VerifyOutcome, deleted: bool) -> SpecFileRecord {
        SpecFileRecord {
            index: 0,
            volume: 1,
            path: PathBuf::from("/mnt/sdc/data/a.spec"),
            frames: 5000,
            bytes: 5000 * 4128,
            outcome,
            deleted,
        }
    }

    #[test]
    fn test_verified_line() {
        let report = GapReport::from_counters(&[0, 1, 3, 4], 1 << 20);
        let line = ReportLine(&record(VerifyOutcome::Verified(report), true)).to_string();
        assert_eq!(
            line,
            "file_path:/mnt/sdc/data/a.spec,packets:5000,file_size_mb:20.640,\
             num_dropped_packets:1,frac_of_packets_dropped:0.25,num_gaps:1,neg_gaps:0,\
             mean_gap:1,std_gap:0,max_gap:1,deleted:true"
        );
    }

    #[test]
    fn test_sentinels() {
        let skipped = ReportLine(&record(VerifyOutcome::Skipped, false)).to_string();
        assert!(skipped.contains("num_dropped_packets:-1,"));
        assert!(skipped.ends_with("max_gap:-1,deleted:false"));
        let missing = ReportLine(&record(VerifyOutcome::NotFound, false)).to_string();
        assert!(missing.contains("num_gaps:-2,"));
        let corrupt = ReportLine(&record(VerifyOutcome::Corrupt, true)).to_string();
        assert!(corrupt.contains("num_dropped_packets:-3,"));
        assert!(corrupt.ends_with("max_gap:-3,deleted:true"));
    }

    #[test]
    fn test_line_sink_writes_one_line_per_record() {
        let mut sink = ReportLineSink::new(Vec::new());
        sink.record(&record(VerifyOutcome::Skipped, false)).unwrap();
        sink.record(&record(VerifyOutcome::NotFound, true)).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}

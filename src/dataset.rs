//! The on-disk dataset emitted by the search and replayed by the
//! file-driven policy.
//!
//! Append-only little-endian records of fixed width, one per frame of the
//! optimal path: frame index (`i32`), feature vector (`f32 * 8`), decision
//! bit (`i8`), measured frame time (`f32`). A single trailing `f32` after
//! the last record carries the total path cost.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::metrics::{FeatureVec, FEATURE_WIDTH};

/// Serialized size of one record.
pub const RECORD_BYTES: usize = 4 + 4 * FEATURE_WIDTH + 1 + 4;

/// One frame of the optimal path.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DatasetRecord {
    pub frame: i32,
    pub features: FeatureVec,
    pub decision: bool,
    pub frame_time: f32,
}

/// Streaming record writer; call [`finish`](Self::finish) to append the
/// total-cost trailer.
pub struct DatasetWriter {
    out: BufWriter<File>,
}

impl DatasetWriter {
    pub fn create(path: &Path) -> SimResult<Self> {
        Ok(DatasetWriter { out: BufWriter::new(File::create(path)?) })
    }

    pub fn append(&mut self, record: &DatasetRecord) -> SimResult<()> {
        self.out.write_all(&record.frame.to_le_bytes())?;
        for f in &record.features {
            self.out.write_all(&f.to_le_bytes())?;
        }
        self.out.write_all(&[i8::from(record.decision) as u8])?;
        self.out.write_all(&record.frame_time.to_le_bytes())?;
        Ok(())
    }

    pub fn finish(mut self, total_cost: f32) -> SimResult<()> {
        self.out.write_all(&total_cost.to_le_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// A fully parsed dataset file.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub records: Vec<DatasetRecord>,
    pub total_cost: f32,
}

impl Dataset {
    pub fn read(path: &Path) -> SimResult<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        if bytes.len() < 4 || (bytes.len() - 4) % RECORD_BYTES != 0 {
            return Err(SimError::config(format!(
                "dataset {} is truncated ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }
        let n_records = (bytes.len() - 4) / RECORD_BYTES;
        let mut records = Vec::with_capacity(n_records);
        let mut at = 0;
        for _ in 0..n_records {
            let frame = i32::from_le_bytes(slice4(&bytes, at));
            at += 4;
            let mut features: FeatureVec = [0.0; FEATURE_WIDTH];
            for f in features.iter_mut() {
                *f = f32::from_le_bytes(slice4(&bytes, at));
                at += 4;
            }
            let decision = bytes[at] as i8 != 0;
            at += 1;
            let frame_time = f32::from_le_bytes(slice4(&bytes, at));
            at += 4;
            records.push(DatasetRecord { frame, features, decision, frame_time });
        }
        let total_cost = f32::from_le_bytes(slice4(&bytes, at));
        Ok(Dataset { records, total_cost })
    }

    /// Decision bit recorded for `frame`, false past the end of the file.
    #[must_use]
    pub fn decision_for_frame(&self, frame: usize) -> bool {
        self.records.get(frame).map(|r| r.decision).unwrap_or(false)
    }
}

fn slice4(bytes: &[u8], at: usize) -> [u8; 4] {
    [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<DatasetRecord> {
        (0..5)
            .map(|frame| DatasetRecord {
                frame,
                features: [frame as f32 * 0.5; FEATURE_WIDTH],
                decision: frame % 2 == 0,
                frame_time: 0.25 * frame as f32,
            })
            .collect()
    }

    #[test]
    fn round_trip_preserves_records_and_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.dataset");
        let mut writer = DatasetWriter::create(&path).unwrap();
        let records = sample_records();
        for r in &records {
            writer.append(r).unwrap();
        }
        writer.finish(12.75).unwrap();

        let dataset = Dataset::read(&path).unwrap();
        assert_eq!(dataset.records, records);
        assert_eq!(dataset.total_cost, 12.75);
    }

    #[test]
    fn record_width_matches_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.dataset");
        let mut writer = DatasetWriter::create(&path).unwrap();
        writer.append(&sample_records()[0]).unwrap();
        writer.finish(0.0).unwrap();
        let len = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len, RECORD_BYTES + 4);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dataset");
        std::fs::write(&path, [0u8; RECORD_BYTES + 2]).unwrap();
        assert!(Dataset::read(&path).is_err());
    }

    #[test]
    fn decisions_past_the_end_default_to_false() {
        let dataset = Dataset { records: sample_records(), total_cost: 0.0 };
        assert!(dataset.decision_for_frame(0));
        assert!(!dataset.decision_for_frame(1));
        assert!(!dataset.decision_for_frame(99));
    }
}

//! Corruption recovery over a container file.
//!
//! The scanner walks every block, counting blocks and records, and recovers
//! what the selected mode asks for: values before the first corrupt block,
//! values after it, everything salvageable, or nothing but the counts.
//! Within a corrupt block, decoding keeps probing record by record until the
//! consecutive-failure threshold is reached, at which point the rest of the
//! block is abandoned and the reader resumes at the block's trailing sync
//! marker. Block-level corruption (bad header, marker mismatch, failed
//! decompression) falls back to a forward scan for the next marker.

use log::{debug, warn};
use std::io::{Read, Seek};

use crate::error::CaskError;
use crate::value::Value;

use super::reader::FileReader;

//==================================================================================
// 1. Configuration and Report
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    /// Recover every record that still decodes.
    All,
    /// Recover only records from blocks strictly before the first corrupt
    /// block.
    Prior,
    /// Recover only records from blocks strictly after the first corrupt
    /// block.
    After,
    /// Recover nothing; compute the counts only.
    Report,
}

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub mode: RepairMode,
    /// Consecutive record failures within one block after which the rest of
    /// the block is abandoned. The threshold is a recovery heuristic, not a
    /// format guarantee.
    pub max_consecutive_failures: u32,
}

impl Default for RepairOptions {
    fn default() -> Self {
        RepairOptions {
            mode: RepairMode::All,
            max_consecutive_failures: 2,
        }
    }
}

/// Counts gathered by a repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub blocks: u64,
    pub corrupt_blocks: u64,
    pub records: u64,
    pub corrupt_records: u64,
    pub records_written: u64,
}

//==================================================================================
// 2. The Repair Scan
//==================================================================================

/// Scans `source` under `options`, passing each recovered value to `emit`,
/// and returns the corruption counts. `emit` is never called in
/// [`RepairMode::Report`].
pub fn repair<R, F>(
    source: R,
    options: RepairOptions,
    mut emit: F,
) -> Result<RepairReport, CaskError>
where
    R: Read + Seek,
    F: FnMut(Value) -> Result<(), CaskError>,
{
    let mut reader = FileReader::new(source)?;
    let mut report = RepairReport::default();
    let threshold = options.max_consecutive_failures.max(1);

    loop {
        let resume_from = reader.previous_sync();
        match reader.has_next() {
            Ok(false) => break,
            Ok(true) => {
                let declared = reader.block_count();
                report.blocks += 1;
                report.records += declared;
                scan_block(
                    &mut reader,
                    declared,
                    threshold,
                    options.mode,
                    &mut report,
                    &mut emit,
                )?;
            }
            Err(CaskError::BlockCorruption { offset, reason }) => {
                report.corrupt_blocks += 1;
                warn!(
                    "unreadable block at {} ({}); scanning for the next sync marker",
                    offset, reason
                );
                reader.sync(resume_from)?;
            }
            Err(other) => return Err(other),
        }
    }

    debug!(
        "repair finished: {}/{} blocks corrupt, {}/{} records corrupt",
        report.corrupt_blocks, report.blocks, report.corrupt_records, report.records
    );
    Ok(report)
}

fn scan_block<R, F>(
    reader: &mut FileReader<R>,
    declared: u64,
    threshold: u32,
    mode: RepairMode,
    report: &mut RepairReport,
    emit: &mut F,
) -> Result<(), CaskError>
where
    R: Read + Seek,
    F: FnMut(Value) -> Result<(), CaskError>,
{
    let mut remaining = declared;
    let mut bad_in_block: u64 = 0;
    let mut consecutive: u32 = 0;

    while remaining > 0 {
        match reader.next_value() {
            Ok(value) => {
                remaining -= 1;
                consecutive = 0;
                let wanted = match mode {
                    RepairMode::All => true,
                    RepairMode::Prior => report.corrupt_blocks == 0,
                    RepairMode::After => report.corrupt_blocks > 0,
                    RepairMode::Report => false,
                };
                if wanted {
                    emit(value)?;
                    report.records_written += 1;
                }
            }
            Err(CaskError::Io(e)) => return Err(CaskError::Io(e)),
            Err(CaskError::Internal(e)) => return Err(CaskError::Internal(e)),
            Err(e) => {
                if bad_in_block == 0 {
                    report.corrupt_blocks += 1;
                    warn!(
                        "corrupt record in block ({} declared): {}",
                        declared, e
                    );
                }
                consecutive += 1;
                if consecutive >= threshold {
                    // Count the current failure and everything left behind
                    // it, then resume at the block's trailing marker.
                    warn!(
                        "{} consecutive failures; abandoning {} remaining records in block",
                        consecutive, remaining
                    );
                    report.corrupt_records += remaining;
                    bad_in_block += remaining;
                    reader.abandon_block();
                    remaining = 0;
                } else {
                    report.corrupt_records += 1;
                    bad_in_block += 1;
                    remaining -= 1;
                }
            }
        }
    }

    if bad_in_block != 0 {
        warn!("{} unrecoverable records in block", bad_in_block);
    }
    Ok(())
}

//==================================================================================
// 3. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::super::writer::{FileWriter, WriterOptions};
    use super::*;
    use crate::codec::varint::read_long;
    use crate::schema::Schema;
    use std::io::Cursor;

    /// Writes one block per batch by forcing a sync between batches, and
    /// returns the file plus each block's start offset.
    fn file_with_blocks(batches: &[&[&str]]) -> (Vec<u8>, Vec<u64>) {
        let mut writer =
            FileWriter::create(Schema::String, Vec::new(), WriterOptions::default()).unwrap();
        let mut offsets = vec![writer.tell()];
        for batch in batches {
            for value in *batch {
                writer.append(&Value::String(value.to_string())).unwrap();
            }
            offsets.push(writer.sync().unwrap());
        }
        offsets.pop();
        (writer.close().unwrap(), offsets)
    }

    /// Overwrites the payload of the block starting at `offset` with 0xFF,
    /// leaving the count, length, and trailing sync marker intact.
    fn corrupt_block_payload(bytes: &mut [u8], offset: u64) {
        let mut cursor = Cursor::new(&bytes[offset as usize..]);
        let _count = read_long(&mut cursor).unwrap();
        let len = read_long(&mut cursor).unwrap() as usize;
        let payload_at = offset as usize + cursor.position() as usize;
        for b in &mut bytes[payload_at..payload_at + len] {
            *b = 0xFF;
        }
    }

    fn strings(values: &[&str]) -> Vec<Value> {
        values
            .iter()
            .map(|s| Value::String(s.to_string()))
            .collect()
    }

    fn run(bytes: &[u8], mode: RepairMode) -> (RepairReport, Vec<Value>) {
        let mut recovered = Vec::new();
        let report = repair(
            Cursor::new(bytes.to_vec()),
            RepairOptions {
                mode,
                ..RepairOptions::default()
            },
            |v| {
                recovered.push(v);
                Ok(())
            },
        )
        .unwrap();
        (report, recovered)
    }

    #[test]
    fn test_clean_file_reports_no_corruption() {
        let (bytes, _) = file_with_blocks(&[&["a", "b"], &["c"]]);
        let (report, recovered) = run(&bytes, RepairMode::All);
        assert_eq!(report.blocks, 2);
        assert_eq!(report.corrupt_blocks, 0);
        assert_eq!(report.records, 3);
        assert_eq!(report.corrupt_records, 0);
        assert_eq!(recovered, strings(&["a", "b", "c"]));
    }

    #[test]
    fn test_prior_mode_stops_at_first_corrupt_block() {
        let (mut bytes, offsets) = file_with_blocks(&[&["a", "b"], &["c", "d"], &["e"]]);
        corrupt_block_payload(&mut bytes, offsets[1]);

        let (report, recovered) = run(&bytes, RepairMode::Prior);
        assert_eq!(recovered, strings(&["a", "b"]));
        assert_eq!(report.corrupt_blocks, 1);
        assert_eq!(report.records_written, 2);
    }

    #[test]
    fn test_after_mode_resumes_past_the_corruption() {
        let (mut bytes, offsets) = file_with_blocks(&[&["a", "b"], &["c", "d"], &["e"]]);
        corrupt_block_payload(&mut bytes, offsets[1]);

        let (_, recovered) = run(&bytes, RepairMode::After);
        assert_eq!(recovered, strings(&["e"]));
    }

    #[test]
    fn test_all_mode_recovers_the_union() {
        let (mut bytes, offsets) = file_with_blocks(&[&["a", "b"], &["c", "d"], &["e"]]);
        corrupt_block_payload(&mut bytes, offsets[1]);

        let (report, recovered) = run(&bytes, RepairMode::All);
        assert_eq!(recovered, strings(&["a", "b", "e"]));
        assert_eq!(report.blocks, 3);
        assert_eq!(report.corrupt_blocks, 1);
        assert_eq!(report.records, 5);
        assert_eq!(report.corrupt_records, 2);
    }

    #[test]
    fn test_report_mode_counts_without_emitting() {
        let (mut bytes, offsets) = file_with_blocks(&[&["a", "b"], &["c", "d"], &["e"]]);
        corrupt_block_payload(&mut bytes, offsets[1]);

        let (report, recovered) = run(&bytes, RepairMode::Report);
        assert!(recovered.is_empty());
        assert_eq!(report.records_written, 0);
        assert_eq!(report.blocks, 3);
        assert_eq!(report.corrupt_blocks, 1);
        assert_eq!(report.records, 5);
        assert_eq!(report.corrupt_records, 2);
    }

    #[test]
    fn test_corrupt_sync_marker_skips_to_a_later_block() {
        let (mut bytes, offsets) = file_with_blocks(&[&["a"], &["b"], &["c"], &["d"]]);
        // Damage block 1's trailing sync marker: its last 16 bytes.
        let marker_at = offsets[2] as usize - 16;
        for b in &mut bytes[marker_at..offsets[2] as usize] {
            *b ^= 0xAA;
        }

        let (report, recovered) = run(&bytes, RepairMode::All);
        // Block 1 dies on the marker mismatch; the forward scan lands on the
        // next intact marker, so at least the trailing blocks come back.
        assert!(report.corrupt_blocks >= 1);
        assert!(recovered.contains(&Value::String("a".to_string())));
        assert!(recovered.contains(&Value::String("d".to_string())));
        assert!(!recovered.contains(&Value::String("b".to_string())));
    }
}

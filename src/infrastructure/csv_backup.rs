//! CSV backup of a phase-1 aggregate.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::AggregatedRecord;

pub const HEADER: [&str; 7] = ["Area", "Month", "ID", "Name", "Type", "Period_1_20", "Period_21_30"];

pub fn backup_file_name(area: &str) -> String {
    format!("period_1_20_{}_latest.csv", area)
}

/// Writes one row with every field quoted.
pub fn write_row<W: Write, S: AsRef<str>>(mut w: W, row: &[S]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if first {
            first = false;
        } else {
            w.write_all(b",")?;
        }
        write!(w, "\"{}\"", cell.as_ref().replace('"', "\"\""))?;
    }
    w.write_all(b"\n")
}

pub fn render(records: &[AggregatedRecord]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    write_row(&mut out, &HEADER)?;
    for r in records {
        write_row(
            &mut out,
            &[
                r.area.as_str(),
                r.month.as_str(),
                r.id.as_str(),
                r.name.as_str(),
                r.kind.as_str(),
                r.phase_one.as_str(),
                r.phase_two.as_str(),
            ],
        )?;
    }
    Ok(out)
}

/// Replaces `<dir>/period_1_20_<AREA>_latest.csv`, creating `dir` if needed.
pub async fn write_backup(dir: &Path, area: &str, records: &[AggregatedRecord]) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(backup_file_name(area));
    tokio::fs::write(&path, render(records)?).await?;
    info!("💾 CSV backup saved: {} ({} records)", path.display(), records.len());
    Ok(path)
}

//! Drops the trailing pose fields from label files (35 values to 29).

use log::{debug, info, warn};
use posekit_common::{
    dataset::LABEL_EXTENSION,
    label::{FIELDS_WITHOUT_POSE, FIELDS_WITH_POSE},
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error as ThisError;

pub const SKIP_REPORT: &str = "skipped_files.txt";

#[derive(ThisError, Debug)]
pub enum RelabelError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelabelReport {
    /// Label files seen.
    pub total: usize,
    /// Files written to the output.
    pub modified: usize,
    /// `(path, field count of the first bad line)`; files that are not
    /// UTF-8 carry the field count of the whole file.
    pub skipped: Vec<(PathBuf, usize)>,
}

/// Rewrites one line, `line` including its terminator if it has one.
///
/// Full rows lose their last six values, stripped rows are kept byte for
/// byte, anything else is an error carrying the field count.
pub fn strip_line(line: &str) -> Result<String, usize> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    match fields.len() {
        FIELDS_WITH_POSE => Ok(fields[..FIELDS_WITHOUT_POSE].join(" ") + "\n"),
        FIELDS_WITHOUT_POSE => Ok(line.to_string()),
        n => Err(n),
    }
}

/// All lines of a file, or the field count of the first line that fits neither shape.
pub fn strip_file(content: &str) -> Result<String, usize> {
    content.split_inclusive('\n').map(strip_line).collect()
}

fn collect_labels(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_labels(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(LABEL_EXTENSION) {
            out.push(path);
        }
    }

    Ok(())
}

/// Mirrors every label under `input` into `output` with the pose fields removed.
///
/// Files with an unexpected line are not written and end up in
/// [`SKIP_REPORT`] inside `output`.
pub fn strip_pose_labels(input: &Path, output: &Path) -> Result<RelabelReport, RelabelError> {
    if !input.is_dir() {
        return Err(RelabelError::NotADirectory(input.to_path_buf()));
    }
    fs::create_dir_all(output)?;

    let mut files = vec![];
    collect_labels(input, &mut files)?;

    let mut report = RelabelReport::default();
    for path in files {
        report.total += 1;

        let bytes = fs::read(&path)?;
        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                let n = String::from_utf8_lossy(e.as_bytes()).split_whitespace().count();
                warn!("{}: not valid UTF-8, skipping file", path.display());
                report.skipped.push((path, n));
                continue;
            }
        };
        let stripped = match strip_file(&content) {
            Ok(s) => s,
            Err(n) => {
                warn!("{}: line with {n} values, skipping file", path.display());
                report.skipped.push((path, n));
                continue;
            }
        };

        let target = match path.strip_prefix(input) {
            Ok(rel) => output.join(rel),
            Err(_) => continue,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, stripped)?;

        debug!("{} -> {}", path.display(), target.display());
        report.modified += 1;
    }

    info!(
        "{} files fixed out of {} label files, {} skipped",
        report.modified,
        report.total,
        report.skipped.len()
    );

    if !report.skipped.is_empty() {
        let lines: Vec<String> = report
            .skipped
            .iter()
            .map(|(p, n)| format!("{} - {n} values", p.display()))
            .collect();

        let skip_report = output.join(SKIP_REPORT);
        fs::write(&skip_report, lines.join("\n"))?;
        info!("skipped file list saved to {}", skip_report.display());
    }

    Ok(report)
}

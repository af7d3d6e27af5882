use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use utils::{modified_time, FileTracker, OutputKind};

use crate::converters::BrokerConverter;

/// A broker file waiting to be converted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: PathBuf,
    pub file_name: String,
    /// Position of the accepting converter in the worker's list.
    pub converter: usize,
    pub kind: OutputKind,
    pub modified: NaiveDateTime,
}

/// Lists the files some converter accepts, in file-name order.
pub fn discover(input_dir: &Path, converters: &[Box<dyn BrokerConverter>]) -> Result<Vec<Candidate>> {
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("Cannot read input directory {}", input_dir.display()))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        let accepted = converters
            .iter()
            .enumerate()
            .find_map(|(i, c)| c.accepts(&file_name).map(|kind| (i, kind)));
        let Some((converter, kind)) = accepted else {
            tracing::trace!(file = %file_name, "no converter for file");
            continue;
        };

        let modified = modified_time(&path)?;
        candidates.push(Candidate {
            path,
            file_name,
            converter,
            kind,
            modified,
        });
    }

    candidates.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(candidates)
}

/// Keeps files that are not in the tracking table or changed since.
pub fn newer_than_tracked(candidates: Vec<Candidate>, tracker: &FileTracker) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| {
            let newer = tracker.is_newer(&c.file_name, c.modified);
            if !newer {
                tracing::debug!(file = %c.file_name, "unchanged since last conversion");
            }
            newer
        })
        .collect()
}

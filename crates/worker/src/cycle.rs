use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use models::Settings;
use std::path::PathBuf;
use utils::{FileStatus, FileTracker, OutputKind, TrackedFile};

use crate::converters::{default_converters, BrokerConverter};
use crate::discovery::{discover, newer_than_tracked, Candidate};
use crate::notify::{notifier_from_settings, MailMessage, Notifier};
use crate::RunMode;

/// Result of converting one broker file.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub file_name: String,
    pub broker: &'static str,
    pub kind: OutputKind,
    pub last_modified: NaiveDateTime,
    /// Files written, or the error chain.
    pub result: Result<Vec<PathBuf>, String>,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    fn to_tracked(&self, processed_at: NaiveDateTime) -> TrackedFile {
        let (status, outputs, error) = match &self.result {
            Ok(paths) => (
                FileStatus::Success,
                paths.iter().map(|p| p.display().to_string()).collect(),
                None,
            ),
            Err(reason) => (FileStatus::Failure, Vec::new(), Some(reason.clone())),
        };
        TrackedFile {
            file_name: self.file_name.clone(),
            last_modified: self.last_modified,
            status,
            processed_at,
            outputs,
            error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub processed_at: NaiveDateTime,
    pub outcomes: Vec<FileOutcome>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

pub struct Worker {
    settings: Settings,
    mode: RunMode,
    input_dir: PathBuf,
    converters: Vec<Box<dyn BrokerConverter>>,
    notifier: Box<dyn Notifier>,
}

impl Worker {
    pub fn new(settings: Settings, mode: RunMode) -> Result<Self> {
        let input_dir = settings_loader::resolve_input_dir(&settings)?;
        let converters = default_converters(&settings.brokers);
        let notifier = notifier_from_settings(&settings.mail);
        Ok(Self {
            settings,
            mode,
            input_dir,
            converters,
            notifier,
        })
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn input_dir(&self) -> &std::path::Path {
        &self.input_dir
    }

    /// One pass over the input directory.
    ///
    /// A file that fails to convert is logged and reported, and the rest of
    /// the batch still runs. Only production mode reads and writes the
    /// tracking table.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let mut tracker = match self.mode {
            RunMode::Production => Some(FileTracker::open(&self.settings.tracking_db)?),
            RunMode::Test => None,
        };

        let mut candidates = discover(&self.input_dir, &self.converters)?;
        if let Some(tracker) = &tracker {
            candidates = newer_than_tracked(candidates, tracker);
        }
        tracing::info!(
            dir = %self.input_dir.display(),
            files = candidates.len(),
            mode = ?self.mode,
            "starting conversion cycle"
        );

        let outcomes: Vec<FileOutcome> = candidates.iter().map(|c| self.convert(c)).collect();
        let report = CycleReport {
            processed_at: Local::now().naive_local(),
            outcomes,
        };

        if let Some(tracker) = tracker.as_mut() {
            let rows = report
                .outcomes
                .iter()
                .map(|o| o.to_tracked(report.processed_at))
                .collect();
            let stats = tracker.record_all(rows);
            tracker.save()?;
            tracing::info!(
                inserted = stats.inserted,
                updated = stats.updated,
                "tracking table updated"
            );
        }

        if !report.is_empty() {
            let message = MailMessage::from_report(&self.settings.mail, &report);
            if let Err(e) = self.notifier.send(&message) {
                tracing::warn!(error = %format!("{:#}", e), "could not send cycle summary");
            }
        }

        Ok(report)
    }

    fn convert(&self, candidate: &Candidate) -> FileOutcome {
        let converter = &self.converters[candidate.converter];
        let output_dir = PathBuf::from(&self.settings.output_dir);

        let result = converter
            .convert(&candidate.path, candidate.kind, &output_dir)
            .map_err(|e| format!("{:#}", e));

        match &result {
            Ok(outputs) => tracing::info!(
                file = %candidate.file_name,
                broker = converter.name(),
                outputs = outputs.len(),
                "converted"
            ),
            Err(reason) => tracing::error!(
                file = %candidate.file_name,
                broker = converter.name(),
                error = %reason,
                "conversion failed"
            ),
        }

        FileOutcome {
            file_name: candidate.file_name.clone(),
            broker: converter.name(),
            kind: candidate.kind,
            last_modified: candidate.modified,
            result,
        }
    }
}

//! Cycle summaries for the operators.
//!
//! Mail is not sent from here: [`OutboxNotifier`] drops RFC 822 messages into
//! a directory watched by the host's mail relay, [`LogNotifier`] only logs.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use models::MailSettings;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::cycle::CycleReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl MailMessage {
    /// Subject `"{prefix} {ok} succeeded, {failed} failed"`, one body line per file.
    pub fn from_report(mail: &MailSettings, report: &CycleReport) -> Self {
        let subject = format!(
            "{} {} succeeded, {} failed",
            mail.subject_prefix,
            report.succeeded(),
            report.failed()
        );

        let mut body = String::new();
        for outcome in &report.outcomes {
            match &outcome.result {
                Ok(outputs) => {
                    let names: Vec<String> = outputs
                        .iter()
                        .map(|p| {
                            p.file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_else(|| p.display().to_string())
                        })
                        .collect();
                    body.push_str(&format!("[OK] {} -> {}\n", outcome.file_name, names.join(", ")));
                }
                Err(reason) => {
                    body.push_str(&format!("[FAILED] {}: {}\n", outcome.file_name, reason));
                }
            }
        }

        Self {
            from: mail.from.clone(),
            to: mail.to.clone(),
            subject,
            body,
        }
    }

    pub fn to_rfc822(&self, date: DateTime<Local>) -> String {
        let mut text = String::new();
        text.push_str(&format!("From: {}\r\n", self.from));
        text.push_str(&format!("To: {}\r\n", self.to.join(", ")));
        text.push_str(&format!("Subject: {}\r\n", self.subject));
        text.push_str(&format!("Date: {}\r\n", date.to_rfc2822()));
        text.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        text.push_str("\r\n");
        for line in self.body.lines() {
            text.push_str(line);
            text.push_str("\r\n");
        }
        text
    }
}

pub trait Notifier: Send + Sync {
    fn send(&self, message: &MailMessage) -> Result<()>;
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, message: &MailMessage) -> Result<()> {
        tracing::info!(subject = %message.subject, "cycle summary");
        for line in message.body.lines() {
            tracing::info!("{}", line);
        }
        Ok(())
    }
}

pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a fresh `.eml` file; a counter is appended on name clashes.
    fn create_message_file(&self, now: DateTime<Local>) -> Result<(PathBuf, fs::File)> {
        let stem = now.format("%Y%m%d-%H%M%S").to_string();
        for attempt in 0..1000 {
            let name = if attempt == 0 {
                format!("{}.eml", stem)
            } else {
                format!("{}-{}.eml", stem, attempt)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Cannot create {}", path.display()))
                }
            }
        }
        anyhow::bail!("Too many messages for {} in {}", stem, self.dir.display())
    }
}

impl Notifier for OutboxNotifier {
    fn send(&self, message: &MailMessage) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create outbox {}", self.dir.display()))?;

        let now = Local::now();
        let (path, mut file) = self.create_message_file(now)?;
        file.write_all(message.to_rfc822(now).as_bytes())
            .with_context(|| format!("Cannot write {}", path.display()))?;

        tracing::info!(file = %path.display(), subject = %message.subject, "queued summary mail");
        Ok(())
    }
}

/// Outbox delivery when mail is enabled with at least one recipient, logging otherwise.
pub fn notifier_from_settings(mail: &MailSettings) -> Box<dyn Notifier> {
    if !mail.enabled {
        return Box::new(LogNotifier);
    }
    if mail.to.is_empty() {
        tracing::warn!("mail enabled without recipients, summaries are only logged");
        return Box::new(LogNotifier);
    }
    Box::new(OutboxNotifier::new(&mail.outbox_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::FileOutcome;
    use chrono::{NaiveDate, TimeZone};
    use utils::OutputKind;

    fn report() -> CycleReport {
        let at = NaiveDate::from_ymd_opt(2019, 1, 20).unwrap().and_hms_opt(10, 5, 22).unwrap();
        CycleReport {
            processed_at: at,
            outcomes: vec![
                FileOutcome {
                    file_name: "Trades_Activity_20181022.csv".to_string(),
                    broker: "ibkr",
                    kind: OutputKind::Trade,
                    last_modified: at,
                    result: Ok(vec![
                        PathBuf::from("out/40006-B_trade_2018-10-22.csv"),
                        PathBuf::from("out/40006-B_trade_2018-10-22_part2.csv"),
                    ]),
                },
                FileOutcome {
                    file_name: "8888802200trddata_f20140131.txt".to_string(),
                    broker: "guangfa",
                    kind: OutputKind::Trade,
                    last_modified: at,
                    result: Err("Row 3 (SO1405): cannot classify trade side".to_string()),
                },
            ],
        }
    }

    fn mail() -> MailSettings {
        MailSettings {
            enabled: true,
            from: "trades@example.com".to_string(),
            to: vec!["ops@example.com".to_string(), "risk@example.com".to_string()],
            ..MailSettings::default()
        }
    }

    #[test]
    fn test_message_from_report() {
        let msg = MailMessage::from_report(&mail(), &report());
        assert_eq!(msg.subject, "[trade-converter] 1 succeeded, 1 failed");
        let lines: Vec<&str> = msg.body.lines().collect();
        assert_eq!(
            lines[0],
            "[OK] Trades_Activity_20181022.csv -> 40006-B_trade_2018-10-22.csv, 40006-B_trade_2018-10-22_part2.csv"
        );
        assert_eq!(
            lines[1],
            "[FAILED] 8888802200trddata_f20140131.txt: Row 3 (SO1405): cannot classify trade side"
        );
    }

    #[test]
    fn test_rfc822_headers() {
        let msg = MailMessage::from_report(&mail(), &report());
        let date = Local.with_ymd_and_hms(2019, 1, 20, 10, 5, 22).unwrap();
        let text = msg.to_rfc822(date);
        assert!(text.starts_with("From: trades@example.com\r\nTo: ops@example.com, risk@example.com\r\n"));
        assert!(text.contains("Subject: [trade-converter] 1 succeeded, 1 failed\r\n"));
        assert!(text.contains("\r\n\r\n[OK] "));
    }

    #[test]
    fn test_outbox_writes_one_file_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxNotifier::new(dir.path().join("outbox"));
        let msg = MailMessage::from_report(&mail(), &report());
        outbox.send(&msg).unwrap();
        outbox.send(&msg).unwrap();

        let files: Vec<_> = fs::read_dir(outbox.dir()).unwrap().flatten().collect();
        assert_eq!(files.len(), 2);
        let text = fs::read_to_string(files[0].path()).unwrap();
        assert!(text.contains("[FAILED] 8888802200trddata_f20140131.txt"));
    }

    #[test]
    fn test_disabled_mail_only_logs() {
        let msg = MailMessage::from_report(&mail(), &report());
        assert!(notifier_from_settings(&MailSettings::default()).send(&msg).is_ok());
    }
}

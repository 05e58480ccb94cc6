use crate::error::Result;
use chrono::{Local, NaiveDateTime};
use log::info;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Year-MonthName-Day-Hour:Minute:Second
pub const TIMESTAMP_FORMAT: &str = "%Y-%b-%d-%H:%M:%S";

/// Append-only `timestamp,message` trail for one pipeline run.
///
/// The file is opened in append mode, so entries from earlier runs stay in
/// place. Every entry is flushed as soon as it is written; a failing stage
/// never removes what was already recorded.
pub struct AuditLog {
    path: PathBuf,
    file: File,
    last: Option<NaiveDateTime>,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            last: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one entry. Timestamps never go backwards within a run, even if
    /// the wall clock does.
    pub fn record(&mut self, message: &str) -> Result<()> {
        let mut now = Local::now().naive_local();
        if let Some(last) = self.last {
            if now < last {
                now = last;
            }
        }
        self.last = Some(now);

        // One entry per line.
        let message = message.replace(['\r', '\n'], " ");
        writeln!(self.file, "{},{}", now.format(TIMESTAMP_FORMAT), message)?;
        self.file.flush()?;
        info!("{}", message);
        Ok(())
    }

    /// Brackets `f` with `"<name> Started"` and `"<name> Ended"`. On error the
    /// closing entry is `"<name> Failed: <error>"` and the error propagates.
    pub fn stage<T, F>(&mut self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.record(&format!("{} Started", name))?;
        match f(self) {
            Ok(value) => {
                self.record(&format!("{} Ended", name))?;
                Ok(value)
            }
            Err(err) => {
                self.record(&format!("{} Failed: {}", name, err))?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::fs;

    fn entries(path: &Path) -> Vec<(NaiveDateTime, String)> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| {
                let (ts, msg) = line.split_once(',').unwrap();
                let ts = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).unwrap();
                (ts, msg.to_string())
            })
            .collect()
    }

    #[test]
    fn entries_use_timestamp_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut log = AuditLog::open(&path).unwrap();
        log.record("Preliminaries complete").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let (ts, msg) = content.trim_end().split_once(',').unwrap();
        assert_eq!(msg, "Preliminaries complete");
        // e.g. 2024-Sep-02-18:53:26
        assert_eq!(ts.split('-').count(), 4);
        assert!(NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        AuditLog::open(&path).unwrap().record("first").unwrap();
        AuditLog::open(&path).unwrap().record("second").unwrap();

        let messages: Vec<String> = entries(&path).into_iter().map(|(_, m)| m).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn stages_nest_and_timestamps_do_not_decrease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut log = AuditLog::open(&path).unwrap();
        log.stage("Job", |log| {
            log.stage("Extract phase", |_| Ok(()))?;
            log.stage("Load phase", |_| Ok(()))
        })
        .unwrap();

        let entries = entries(&path);
        assert!(entries.windows(2).all(|w| w[0].0 <= w[1].0));
        let messages: Vec<&str> = entries.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Job Started",
                "Extract phase Started",
                "Extract phase Ended",
                "Load phase Started",
                "Load phase Ended",
                "Job Ended",
            ]
        );
    }

    #[test]
    fn failed_stage_is_recorded_and_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut log = AuditLog::open(&path).unwrap();
        let result: Result<()> = log.stage("Transform phase", |_| {
            Err(PipelineError::UnknownUnit("JPY".to_string()))
        });
        assert!(matches!(result, Err(PipelineError::UnknownUnit(_))));

        let last = entries(&path).pop().unwrap().1;
        assert_eq!(last, "Transform phase Failed: Unknown unit: JPY");
    }

    #[test]
    fn multiline_error_stays_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut log = AuditLog::open(&path).unwrap();
        let _ = log.stage("Load phase", |_| -> Result<()> {
            Err(PipelineError::Data("disk full\r\nretry later".to_string()))
        });

        let entries = entries(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].1,
            "Load phase Failed: Data Error: disk full  retry later"
        );
    }
}

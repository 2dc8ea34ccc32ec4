//! Append-only audit log
//!
//! One plain-text file per [`LogCategory`] inside the logs directory. Each
//! entry is a single line: `[YYYY-MM-DD HH:MM:SS] message`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::warn;

use crate::error::{AuditError, RunnerError};
use crate::runner::{CommandResult, Invocation};

const SEPARATOR: &str = "═══════════════════════════════════════";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogCategory {
    Start,
    Stop,
    Status,
    DockerStart,
    DockerStop,
    DockerRestart,
    DockerLogs,
    /// Catch-all for commands that match nothing below
    Commands,
    /// Messages written by the presenter
    Actions,
}

/// Substring → category. First match wins; order matters.
const CATEGORY_TABLE: &[(&str, LogCategory)] = &[
    ("start_services.sh", LogCategory::Start),
    ("stop_services.sh", LogCategory::Stop),
    ("status_services.sh", LogCategory::Status),
    ("start.sh", LogCategory::Start),
    ("stop.sh", LogCategory::Stop),
    ("status.sh", LogCategory::Status),
    ("compose ps", LogCategory::Status),
    ("docker start", LogCategory::DockerStart),
    ("docker stop", LogCategory::DockerStop),
    ("docker restart", LogCategory::DockerRestart),
    ("docker logs", LogCategory::DockerLogs),
];

impl LogCategory {
    pub fn file_name(&self) -> &'static str {
        match self {
            LogCategory::Start => "gui_start.log",
            LogCategory::Stop => "gui_stop.log",
            LogCategory::Status => "gui_status.log",
            LogCategory::DockerStart => "gui_docker_start.log",
            LogCategory::DockerStop => "gui_docker_stop.log",
            LogCategory::DockerRestart => "gui_docker_restart.log",
            LogCategory::DockerLogs => "gui_docker_logs.log",
            LogCategory::Commands => "gui_commands.log",
            LogCategory::Actions => "gui_actions.log",
        }
    }

    /// Pick a category from a rendered command line; never fails
    pub fn classify(command_line: &str) -> Self {
        CATEGORY_TABLE
            .iter()
            .find(|(pattern, _)| command_line.contains(pattern))
            .map(|(_, category)| *category)
            .unwrap_or(LogCategory::Commands)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Local>,
    pub category: LogCategory,
    pub message: String,
}

impl AuditLogEntry {
    pub fn new(category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            category,
            message: message.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }

    /// One rendered line per message line, each ending in `\n`
    fn render_into(&self, buf: &mut String) {
        let stamp = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        let mut lines = self.message.lines().peekable();
        if lines.peek().is_none() {
            buf.push_str(&format!("[{}] \n", stamp));
        }
        for line in lines {
            buf.push_str(&format!("[{}] {}\n", stamp, line));
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one entry. Multi-line messages become one entry per line.
    pub fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Append entries with one write per category file, so a block from one
    /// command never interleaves with lines from another.
    pub fn append_all(&self, entries: &[AuditLogEntry]) -> Result<(), AuditError> {
        let mut blocks: BTreeMap<LogCategory, String> = BTreeMap::new();
        for entry in entries {
            entry.render_into(blocks.entry(entry.category).or_default());
        }
        if blocks.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;
        for (category, block) in blocks {
            let path = self.dir.join(category.file_name());
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(block.as_bytes())?;
        }
        Ok(())
    }

    /// Append, reporting failure through tracing only
    pub fn record(&self, category: LogCategory, message: impl Into<String>) {
        let entry = AuditLogEntry::new(category, message);
        if let Err(e) = self.append(&entry) {
            warn!(category = entry.category.file_name(), error = %e, "audit write failed");
        }
    }

    pub fn append_user_log(&self, message: &str) -> Result<(), AuditError> {
        self.append(&AuditLogEntry::new(LogCategory::Actions, message))
    }

    /// Write the whole block for one finished invocation: separator, the
    /// command (stamped with its start time), output lines and the verdict.
    pub(crate) fn record_run(
        &self,
        invocation: &Invocation,
        started_at: DateTime<Local>,
        outcome: &Result<CommandResult, RunnerError>,
    ) -> LogCategory {
        let command_line = invocation.command_line();
        let category = LogCategory::classify(&command_line);
        let stamped = |timestamp, message: String| AuditLogEntry {
            timestamp,
            category,
            message,
        };

        let mut entries = vec![
            stamped(started_at, SEPARATOR.to_string()),
            stamped(started_at, format!("EXECUTING: {}", command_line)),
        ];
        let finished_at = Local::now();
        match outcome {
            Ok(result) => {
                for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
                    entries.push(stamped(finished_at, format!("STDOUT: {}", line)));
                }
                for line in result.stderr.lines().filter(|l| !l.trim().is_empty()) {
                    entries.push(stamped(finished_at, format!("STDERR: {}", line)));
                }
                let verdict = match result.exit_code {
                    Some(0) => "SUCCESS - Exit code: 0".to_string(),
                    Some(code) => format!("FAILED - Exit code: {}", code),
                    None => "FAILED - terminated by signal".to_string(),
                };
                entries.push(stamped(finished_at, verdict));
            }
            Err(RunnerError::Spawn { source, .. }) => {
                entries.push(stamped(finished_at, format!("SPAWN FAILED: {}", source)));
            }
            Err(RunnerError::Timeout { timeout, .. }) => {
                entries.push(stamped(finished_at, format!("TIMED OUT after {:?}", timeout)));
            }
        }

        if let Err(e) = self.append_all(&entries) {
            warn!(category = category.file_name(), error = %e, "audit write failed");
        }
        category
    }

    /// File names in the logs directory, sorted. Missing directory → empty.
    pub fn list_files(&self) -> Result<Vec<String>, AuditError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read_file(&self, name: &str) -> Result<String, AuditError> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name == "."
            || name == ".."
        {
            return Err(AuditError::InvalidName {
                name: name.to_string(),
            });
        }

        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(AuditError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_table() {
        assert_eq!(LogCategory::classify("bash scripts/start.sh"), LogCategory::Start);
        assert_eq!(LogCategory::classify("bash scripts/stop.sh"), LogCategory::Stop);
        assert_eq!(LogCategory::classify("bash scripts/status.sh"), LogCategory::Status);
        assert_eq!(
            LogCategory::classify("docker compose ps --format json"),
            LogCategory::Status
        );
        assert_eq!(
            LogCategory::classify("docker start norex_apache"),
            LogCategory::DockerStart
        );
        assert_eq!(
            LogCategory::classify("docker restart norex_mysql"),
            LogCategory::DockerRestart
        );
        assert_eq!(
            LogCategory::classify("docker logs --tail 10 norex_pma"),
            LogCategory::DockerLogs
        );
        assert_eq!(LogCategory::classify("xdg-open /tmp/www"), LogCategory::Commands);
        assert_eq!(LogCategory::classify(""), LogCategory::Commands);
    }

    #[test]
    fn test_entry_render_format() {
        let entry = AuditLogEntry::new(LogCategory::Actions, "hello");
        let line = entry.render();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] hello"));
        // [YYYY-MM-DD HH:MM:SS]
        assert_eq!(line.find(']'), Some(20));
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs"));

        log.append_user_log("first").unwrap();
        log.append_user_log("second\nthird").unwrap();

        let content = log.read_file("gui_actions.log").unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] second"));
        assert!(lines[2].ends_with("] third"));
        assert!(lines.iter().all(|l| l.starts_with('[')));
    }

    #[test]
    fn test_list_files_sorted_and_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        assert!(log.list_files().unwrap().is_empty());

        log.record(LogCategory::Stop, "x");
        log.record(LogCategory::DockerStart, "y");
        log.record(LogCategory::Actions, "z");
        fs::create_dir(dir.path().join("archive")).unwrap();

        assert_eq!(
            log.list_files().unwrap(),
            vec!["gui_actions.log", "gui_docker_start.log", "gui_stop.log"]
        );
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("does-not-exist"));
        assert!(log.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        assert!(matches!(
            log.read_file("../etc/passwd"),
            Err(AuditError::InvalidName { .. })
        ));
        assert!(matches!(log.read_file(".."), Err(AuditError::InvalidName { .. })));
        assert!(matches!(
            log.read_file("missing.log"),
            Err(AuditError::NotFound { .. })
        ));
    }

    #[test]
    fn test_record_run_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        let inv = Invocation::new("docker", vec!["stop".into(), "norex_apache".into()]);

        let category = log.record_run(
            &inv,
            Local::now(),
            &Ok(CommandResult::failure(1, "no such container")),
        );
        assert_eq!(category, LogCategory::DockerStop);

        let content = log.read_file("gui_docker_stop.log").unwrap();
        let messages: Vec<&str> = content
            .lines()
            .map(|l| l.split_once("] ").map(|(_, m)| m).unwrap_or(l))
            .collect();
        assert_eq!(
            messages,
            vec![
                SEPARATOR,
                "EXECUTING: docker stop norex_apache",
                "STDERR: no such container",
                "FAILED - Exit code: 1",
            ]
        );
        assert!(content.lines().all(|l| l.starts_with('[')));
    }

    #[test]
    fn test_append_all_splits_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        log.append_all(&[
            AuditLogEntry::new(LogCategory::Stop, "a"),
            AuditLogEntry::new(LogCategory::Actions, "b"),
            AuditLogEntry::new(LogCategory::Stop, "c\nd"),
        ])
        .unwrap();
        log.append_all(&[]).unwrap();

        let stop = log.read_file("gui_stop.log").unwrap();
        assert_eq!(stop.lines().count(), 3);
        assert!(stop.lines().nth(2).unwrap().ends_with("] d"));
        assert_eq!(log.read_file("gui_actions.log").unwrap().lines().count(), 1);
    }
}

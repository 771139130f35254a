use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::ProjectLog;

/// Append-only processing history, one JSON document per line.
pub struct LogRecorder {
    path: PathBuf,
    append: Mutex<()>,
}

/// Outcome of one processing run.
pub enum RunOutcome {
    Succeeded(String),
    Failed(String),
}

impl LogRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: Mutex::new(()),
        }
    }

    pub async fn record_run(
        &self,
        project_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        outcome: RunOutcome,
    ) -> Result<ProjectLog> {
        let (success, message) = match outcome {
            RunOutcome::Succeeded(message) => (true, message),
            RunOutcome::Failed(message) => (false, message),
        };

        #[allow(clippy::cast_precision_loss)]
        let duration_seconds = (end - start).num_milliseconds().max(0) as f64 / 1000.0;

        let log = ProjectLog {
            project_key: project_key.to_string(),
            started_at: start,
            duration_seconds,
            success,
            message,
        };

        let mut line = serde_json::to_vec(&log)?;
        line.push(b'\n');

        let _guard = self.append.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!("Recorded run for {project_key}: {}", log.message);
        Ok(log)
    }

    /// Logs for one project, most recent first.
    pub async fn list_logs(&self, project_key: &str) -> Result<Vec<ProjectLog>> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut logs = Vec::new();
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ProjectLog>(&line) {
                Ok(log) if log.project_key == project_key => logs.push(log),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable log line: {e}"),
            }
        }

        logs.reverse();
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn recorder(dir: &tempfile::TempDir) -> LogRecorder {
        LogRecorder::new(dir.path().join("logs.jsonl"))
    }

    #[tokio::test]
    async fn test_record_run_returns_stored_log() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(&dir);
        let start = Utc::now();

        let log = recorder
            .record_run(
                "acme_widgets",
                start,
                start + Duration::milliseconds(1500),
                RunOutcome::Succeeded("refreshed".into()),
            )
            .await
            .unwrap();

        assert!(log.success);
        assert_eq!(log.duration_seconds, 1.5);
        assert_eq!(log.message, "refreshed");
    }

    #[tokio::test]
    async fn test_logs_are_listed_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(&dir);
        let start = Utc::now();

        for i in 0..3 {
            recorder
                .record_run(
                    "acme_widgets",
                    start + Duration::minutes(i),
                    start + Duration::minutes(i),
                    RunOutcome::Succeeded(format!("run {i}")),
                )
                .await
                .unwrap();
        }

        let logs = recorder.list_logs("acme_widgets").await.unwrap();

        let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["run 2", "run 1", "run 0"]);
    }

    #[tokio::test]
    async fn test_logs_are_scoped_to_project() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(&dir);
        let now = Utc::now();

        recorder
            .record_run("acme_widgets", now, now, RunOutcome::Succeeded("a".into()))
            .await
            .unwrap();
        recorder
            .record_run("contoso_shop_web", now, now, RunOutcome::Failed("b".into()))
            .await
            .unwrap();

        let logs = recorder.list_logs("contoso_shop_web").await.unwrap();

        assert_eq!(logs.len(), 1);
        assert!(!logs[0].success);
    }

    #[tokio::test]
    async fn test_history_is_never_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(&dir);
        let now = Utc::now();

        recorder
            .record_run("acme_widgets", now, now, RunOutcome::Succeeded("first".into()))
            .await
            .unwrap();
        let before = std::fs::read_to_string(dir.path().join("logs.jsonl")).unwrap();
        recorder
            .record_run("acme_widgets", now, now, RunOutcome::Succeeded("second".into()))
            .await
            .unwrap();
        let after = std::fs::read_to_string(dir.path().join("logs.jsonl")).unwrap();

        assert!(after.starts_with(&before));
    }

    #[tokio::test]
    async fn test_missing_log_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();

        let logs = recorder(&dir).list_logs("acme_widgets").await.unwrap();

        assert!(logs.is_empty());
    }
}

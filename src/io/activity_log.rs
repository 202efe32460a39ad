//! Activity log - mirrors walk activities to a JSONL file
//!
//! Activities are written one JSON object per line. Producers hand records
//! to a bounded channel with `try_send` so a slow disk never stalls a
//! request; the writer task owns the file.

use crate::domain::WalkActivity;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// JSONL writer for activities
pub struct ActivityLog {
    file_path: String,
}

impl ActivityLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "activity_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Append one activity. Returns true if written.
    pub fn write_activity(&self, activity: &WalkActivity) -> bool {
        let json = match serde_json::to_string(activity) {
            Ok(json) => json,
            Err(e) => {
                error!(activity_id = %activity.id, error = %e, "activity_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => true,
            Err(e) => {
                error!(activity_id = %activity.id, error = %e, "activity_log_write_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "activity_log_written");
        Ok(())
    }

    /// Drain the channel into the file until shutdown
    pub async fn run(self, mut rx: mpsc::Receiver<WalkActivity>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        while let Ok(activity) = rx.try_recv() {
                            self.write_activity(&activity);
                        }
                        info!("activity_log_shutdown");
                        return;
                    }
                }
                msg = rx.recv() => match msg {
                    Some(activity) => {
                        self.write_activity(&activity);
                    }
                    None => return,
                },
            }
        }
    }
}

/// Cloneable producer side of the activity log channel
#[derive(Clone)]
pub struct ActivityLogSender {
    tx: mpsc::Sender<WalkActivity>,
}

impl ActivityLogSender {
    /// Queue an activity, dropping it if the writer is behind
    pub fn send(&self, activity: &WalkActivity) {
        if let Err(e) = self.tx.try_send(activity.clone()) {
            warn!(activity_id = %activity.id, error = %e, "activity_log_dropped");
        }
    }
}

/// Create the channel pair for the activity log
pub fn create_activity_log(capacity: usize) -> (ActivityLogSender, mpsc::Receiver<WalkActivity>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ActivityLogSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityType, GeoPoint, SessionId};
    use chrono::Utc;
    use std::fs;
    use tempfile::tempdir;

    fn activity(kind: ActivityType) -> WalkActivity {
        WalkActivity::new(SessionId::new(), kind, Some(GeoPoint { latitude: 1.0, longitude: 2.0 }), Utc::now())
    }

    #[test]
    fn test_write_activity() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("logs").join("activities.jsonl");
        let log = ActivityLog::new(file_path.to_str().unwrap());

        let act = activity(ActivityType::SessionStarted);
        assert!(log.write_activity(&act));
        assert!(log.write_activity(&activity(ActivityType::SessionEnded)));

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["id"], act.id.to_string());
        assert_eq!(parsed["activityType"], "session_started");
    }

    #[tokio::test]
    async fn test_writer_drains_on_shutdown() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("activities.jsonl");
        let log = ActivityLog::new(file_path.to_str().unwrap());
        let (sender, rx) = create_activity_log(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for _ in 0..3 {
            sender.send(&activity(ActivityType::ArrivedAtHouse));
        }
        let handle = tokio::spawn(log.run(rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_send_drops_when_full() {
        let (sender, mut rx) = create_activity_log(1);
        sender.send(&activity(ActivityType::SessionPaused));
        sender.send(&activity(ActivityType::SessionResumed));
        assert_eq!(rx.try_recv().unwrap().activity_type, ActivityType::SessionPaused);
        assert!(rx.try_recv().is_err());
    }
}

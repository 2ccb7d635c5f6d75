//! Append-only activity log.
//!
//! Every client action lands as one JSON line in a per-session file, so a
//! disbursement operator can reconstruct what the terminal did and when.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ActivityLog {
    pub path: PathBuf,
    session_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    session_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl ActivityLog {
    pub fn new(path: &Path, session_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            session_id: session_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            session_id: &self.session_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn login_ok(&mut self, username: &str) -> Result<()> {
        self.log("login", serde_json::json!({ "username": username }))
    }

    pub fn login_failed(&mut self, email: &str, reason: &str) -> Result<()> {
        self.log(
            "login_failed",
            serde_json::json!({ "email": email, "reason": reason }),
        )
    }

    pub fn logout(&mut self) -> Result<()> {
        self.log("logout", serde_json::json!({}))
    }

    pub fn session_expired(&mut self) -> Result<()> {
        self.log("session_expired", serde_json::json!({}))
    }

    pub fn auth_rejected(&mut self) -> Result<()> {
        self.log("auth_rejected", serde_json::json!({}))
    }

    pub fn registered(&mut self, username: &str, email: &str) -> Result<()> {
        self.log(
            "registered",
            serde_json::json!({ "username": username, "email": email }),
        )
    }

    pub fn fund_created(&mut self, name: &str, total_amount: f64) -> Result<()> {
        self.log(
            "fund_created",
            serde_json::json!({ "name": name, "total_amount": total_amount }),
        )
    }

    pub fn transaction_created(
        &mut self,
        fund_id: u64,
        recipient: &str,
        amount: f64,
    ) -> Result<()> {
        self.log(
            "transaction_created",
            serde_json::json!({
                "fund_id": fund_id,
                "recipient": recipient,
                "amount": amount,
            }),
        )
    }

    pub fn events_seen(&mut self, count: usize) -> Result<()> {
        self.log("events_seen", serde_json::json!({ "count": count }))
    }

    pub fn watch_started(&mut self, interval_secs: u64) -> Result<()> {
        self.log(
            "watch_started",
            serde_json::json!({ "interval_secs": interval_secs }),
        )
    }

    pub fn watch_stopped(&mut self, reason: &str) -> Result<()> {
        self.log("watch_stopped", serde_json::json!({ "reason": reason }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");

        let mut log = ActivityLog::new(&path, "s-1").unwrap();
        log.login_ok("alice").unwrap();
        log.fund_created("Relief", 10.0).unwrap();
        log.logout().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "login");
        assert_eq!(first["username"], "alice");
        assert_eq!(first["session_id"], "s-1");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "fund_created");
        assert_eq!(second["total_amount"], 10.0);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity").join("session.jsonl");

        let mut log = ActivityLog::new(&path, "s-2").unwrap();
        log.session_expired().unwrap();

        assert!(path.exists());
    }
}

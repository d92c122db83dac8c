//! Security event monitoring.
//!
//! Two halves: a durable append-only audit log (newline-delimited JSON, one
//! entry per line, suitable for an external log shipper to tail) and an
//! in-memory alerting layer. High-severity events additionally land in a
//! bounded ring of acknowledgeable alerts; the ring does not survive a
//! restart, the audit log is the durable record.

use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Failed logins per IP per hour before a `MultipleFailedLogins` event fires.
pub const DEFAULT_FAILED_LOGIN_THRESHOLD: u32 = 10;

/// Maximum number of alerts retained in memory.
const MAX_ALERTS: usize = 100;

/// User agent substrings that mark a request as coming from a known scanner.
const SCANNER_AGENTS: &[&str] = &["sqlmap", "nikto", "nmap", "masscan", "dirbuster"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Session-hijack indicator: token identity does not match the session.
    SessionMismatch,
    AccountLocked,
    CorsViolation,
    InvalidSession,
    MultipleFailedLogins,
    FailedLogin,
    SuspiciousUserAgent,
    LoginSuccess,
    Logout,
    PasswordChanged,
    AccountRegistered,
    AccountApproved,
    AccountDeleted,
    BackupCreated,
    BackupRestored,
    ServerStarted,
    ServerStopped,
}

impl EventType {
    /// Static severity lookup.
    pub fn severity(&self) -> Severity {
        match self {
            EventType::SessionMismatch => Severity::Critical,
            EventType::AccountLocked
            | EventType::CorsViolation
            | EventType::InvalidSession
            | EventType::MultipleFailedLogins => Severity::High,
            EventType::FailedLogin | EventType::SuspiciousUserAgent => Severity::Medium,
            EventType::LoginSuccess | EventType::Logout | EventType::PasswordChanged => {
                Severity::Low
            }
            EventType::AccountRegistered
            | EventType::AccountApproved
            | EventType::AccountDeleted
            | EventType::BackupCreated
            | EventType::BackupRestored
            | EventType::ServerStarted
            | EventType::ServerStopped => Severity::Info,
        }
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    pub details: serde_json::Value,
}

/// An actionable high-severity alert held in memory.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub acknowledged: bool,
}

/// Hour-bucketed failed-login counter for one IP.
#[derive(Debug, Clone)]
struct FailureBucket {
    hour: DateTime<Utc>,
    count: u32,
    emails: HashSet<String>,
}

pub struct SecurityMonitor {
    log_path: PathBuf,
    /// Serializes appends so concurrent events cannot interleave lines.
    log_lock: tokio::sync::Mutex<()>,
    failed_logins: DashMap<String, FailureBucket>,
    alerts: Mutex<VecDeque<Alert>>,
    failed_login_threshold: u32,
}

impl SecurityMonitor {
    pub fn new(log_path: PathBuf, failed_login_threshold: u32) -> Self {
        Self {
            log_path,
            log_lock: tokio::sync::Mutex::new(()),
            failed_logins: DashMap::new(),
            alerts: Mutex::new(VecDeque::new()),
            failed_login_threshold,
        }
    }

    /// Record an event: append it to the audit log and, for HIGH/CRITICAL
    /// severities, raise an in-memory alert. Logging failures are reported
    /// but never propagated to the caller.
    pub async fn record(&self, event_type: EventType, details: serde_json::Value) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event_type,
            severity: event_type.severity(),
            details: details.clone(),
        };

        if let Err(e) = self.append(&entry).await {
            warn!(event = ?event_type, error = %e, "Failed to append security event");
        }

        if entry.severity >= Severity::High {
            let mut alerts = self.alerts.lock();
            if alerts.len() >= MAX_ALERTS {
                alerts.pop_front();
            }
            alerts.push_back(Alert {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: entry.timestamp,
                event_type,
                severity: entry.severity,
                details,
                acknowledged: false,
            });
        }
    }

    async fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.log_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }

    /// Track a failed login attempt against the hour-bucketed per-IP counter.
    /// Crossing the threshold emits a distinct `MultipleFailedLogins` event.
    pub async fn track_failed_login(&self, email: &str, ip: &str, user_agent: &str) {
        self.record(
            EventType::FailedLogin,
            serde_json::json!({ "email": email, "ip": ip, "user_agent": user_agent }),
        )
        .await;
        self.check_user_agent(ip, user_agent).await;

        let hour = current_hour();
        let (count, distinct_emails) = {
            let mut bucket = self
                .failed_logins
                .entry(ip.to_string())
                .or_insert_with(|| FailureBucket {
                    hour,
                    count: 0,
                    emails: HashSet::new(),
                });
            if bucket.hour != hour {
                bucket.hour = hour;
                bucket.count = 0;
                bucket.emails.clear();
            }
            bucket.count += 1;
            bucket.emails.insert(email.to_lowercase());
            (bucket.count, bucket.emails.len())
        };

        if count == self.failed_login_threshold {
            self.record(
                EventType::MultipleFailedLogins,
                serde_json::json!({
                    "ip": ip,
                    "attempts_this_hour": count,
                    "distinct_emails": distinct_emails,
                }),
            )
            .await;
        }
    }

    /// A successful authentication resets local suspicion for the IP.
    pub async fn track_successful_login(&self, email: &str, ip: &str, user_agent: &str) {
        self.failed_logins.remove(ip);
        self.record(
            EventType::LoginSuccess,
            serde_json::json!({ "email": email, "ip": ip, "user_agent": user_agent }),
        )
        .await;
    }

    async fn check_user_agent(&self, ip: &str, user_agent: &str) {
        let ua = user_agent.to_lowercase();
        let suspicious = ua.is_empty() || SCANNER_AGENTS.iter().any(|s| ua.contains(s));
        if suspicious {
            self.record(
                EventType::SuspiciousUserAgent,
                serde_json::json!({ "ip": ip, "user_agent": user_agent }),
            )
            .await;
        }
    }

    /// Current alerts, newest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().iter().rev().cloned().collect()
    }

    /// Acknowledge a single alert by id. Returns false if unknown.
    pub fn acknowledge(&self, alert_id: &str) -> bool {
        let mut alerts = self.alerts.lock();
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }
}

fn current_hour() -> DateTime<Utc> {
    Utc::now()
        .duration_trunc(Duration::hours(1))
        .unwrap_or_else(|_| Utc::now())
}

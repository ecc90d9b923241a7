use std::collections::{HashMap, VecDeque};
use std::process::Command;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use twine::errors::TwineError;
use twine::log::Logger;

/// Failure timestamps kept per service. Both rate windows are counted from
/// this history, so a daily cap above this value can never trip.
pub const MAX_FAILURE_HISTORY: usize = 5;

/// Rolling failure history for one service, oldest first.
#[derive(Debug, Clone, Default)]
pub struct FailureRecord {
    dates: VecDeque<DateTime<Utc>>,
}

impl FailureRecord {
    pub fn record(&mut self, at: DateTime<Utc>) {
        self.dates.push_back(at);
        while self.dates.len() > MAX_FAILURE_HISTORY {
            self.dates.pop_front();
        }
    }

    pub fn dates(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.dates.iter()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Failures no older than `window` at `now`.
    pub fn count_within(&self, now: DateTime<Utc>, window: TimeDelta) -> usize {
        self.dates.iter().filter(|d| now - **d <= window).count()
    }
}

/// What the responder needs to know about a failing service.
#[derive(Debug, Clone)]
pub struct FailureState {
    pub service_name: String,
    pub notify_on_stop: bool,
    pub recipients: Vec<String>,
    /// 0 or negative means unlimited.
    pub max_per_minute: i64,
    /// 0 or negative means unlimited.
    pub max_per_day: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
    pub service_name: String,
    pub occurred_at: DateTime<Utc>,
    pub recent_failures: Vec<DateTime<Utc>>,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Notified,
    /// A rate cap was exceeded.
    Suppressed,
    /// The service does not ask for notifications.
    NotRequested,
    InvalidRecipients,
    DeliveryFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderEvent {
    ExceptionsUpdated { count: usize, latest: String },
}

pub trait Notifier: Send + Sync {
    fn send_service_failure(&self, notice: &FailureNotice) -> Result<(), TwineError>;
}

/// Records failures and sends rate-limited notifications.
pub struct FailureResponder {
    logger: Arc<dyn Logger>,
    notifier: Arc<dyn Notifier>,
    records: Mutex<HashMap<String, FailureRecord>>,
    exceptions: Mutex<Vec<String>>,
    observers: Mutex<Vec<Sender<ResponderEvent>>>,
}

impl FailureResponder {
    pub fn new(logger: Arc<dyn Logger>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            logger,
            notifier,
            records: Mutex::new(HashMap::new()),
            exceptions: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<ResponderEvent> {
        let (tx, rx) = channel();
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        rx
    }

    pub fn handle_failure(&self, state: &FailureState) -> FailureOutcome {
        self.handle_failure_at(state, Utc::now())
    }

    pub fn handle_failure_at(&self, state: &FailureState, now: DateTime<Utc>) -> FailureOutcome {
        let (last_minute, today, history) = {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let record = records.entry(state.service_name.clone()).or_default();
            record.record(now);
            (
                record.count_within(now, TimeDelta::minutes(1)),
                record.count_within(now, TimeDelta::days(1)),
                record.dates().copied().collect::<Vec<_>>(),
            )
        };

        self.logger.warn(&format!(
            "Failure recorded for '{}' ({} in the last minute, {} today)",
            state.service_name, last_minute, today
        ));

        if exceeds(last_minute, state.max_per_minute) || exceeds(today, state.max_per_day) {
            self.logger.info(&format!(
                "Notification for '{}' suppressed by rate limit",
                state.service_name
            ));
            return FailureOutcome::Suppressed;
        }

        if !state.notify_on_stop {
            return FailureOutcome::NotRequested;
        }

        let notice = FailureNotice {
            service_name: state.service_name.clone(),
            occurred_at: now,
            recent_failures: history,
            recipients: state.recipients.clone(),
        };
        self.send_email(&notice)
    }

    pub fn failure_history(&self, service_name: &str) -> Vec<DateTime<Utc>> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(service_name)
            .map(|r| r.dates().copied().collect())
            .unwrap_or_default()
    }

    /// Delivery failures reported by the notifier so far.
    pub fn exceptions(&self) -> Vec<String> {
        self.exceptions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn send_email(&self, notice: &FailureNotice) -> FailureOutcome {
        if let Err(e) = validate_recipients(&notice.recipients) {
            self.logger.error_exception(
                &e,
                &format!("Cannot notify about '{}'", notice.service_name),
            );
            return FailureOutcome::InvalidRecipients;
        }

        match self.notifier.send_service_failure(notice) {
            Ok(()) => {
                self.logger.info(&format!(
                    "Failure notice for '{}' sent to {}",
                    notice.service_name,
                    notice.recipients.join(", ")
                ));
                FailureOutcome::Notified
            }
            Err(e) => {
                self.logger.error_exception(
                    &e,
                    &format!("Failure notice for '{}' not delivered", notice.service_name),
                );
                self.push_exception(e.to_string());
                FailureOutcome::DeliveryFailed
            }
        }
    }

    fn push_exception(&self, message: String) {
        let count = {
            let mut exceptions = self.exceptions.lock().unwrap_or_else(|e| e.into_inner());
            exceptions.push(message.clone());
            exceptions.len()
        };

        let event = ResponderEvent::ExceptionsUpdated {
            count,
            latest: message,
        };
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn exceeds(count: usize, cap: i64) -> bool {
    cap > 0 && count as i64 > cap
}

fn validate_recipients(recipients: &[String]) -> Result<(), TwineError> {
    if recipients.is_empty() {
        return Err(TwineError::InvalidRecipients("no recipients configured".into()));
    }
    if recipients.iter().any(|r| r.trim().is_empty()) {
        return Err(TwineError::InvalidRecipients("blank recipient entry".into()));
    }
    Ok(())
}

// === NOTIFIERS ===

/// Writes the notice to the daemon log. Used when no notify command is set.
pub struct LogNotifier {
    logger: Arc<dyn Logger>,
}

impl LogNotifier {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl Notifier for LogNotifier {
    fn send_service_failure(&self, notice: &FailureNotice) -> Result<(), TwineError> {
        self.logger.warn(&format!(
            "Service '{}' stopped unexpectedly at {} (notify: {})",
            notice.service_name,
            notice.occurred_at.to_rfc3339(),
            notice.recipients.join(", ")
        ));
        Ok(())
    }
}

/// Runs an external command per notice, passing details through
/// `TRELLIS_*` environment variables. A non-zero exit is a delivery failure.
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn shell(&self) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(&self.command);
            cmd
        }
    }
}

impl Notifier for CommandNotifier {
    fn send_service_failure(&self, notice: &FailureNotice) -> Result<(), TwineError> {
        let output = self
            .shell()
            .env("TRELLIS_SERVICE", &notice.service_name)
            .env("TRELLIS_OCCURRED_AT", notice.occurred_at.to_rfc3339())
            .env("TRELLIS_RECIPIENTS", notice.recipients.join(","))
            .env("TRELLIS_RECENT_FAILURES", notice.recent_failures.len().to_string())
            .output()
            .map_err(|e| TwineError::Notify(format!("Failed to run '{}': {}", self.command, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TwineError::Notify(format!(
                "'{}' exited with {:?}: {}",
                self.command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryLogger, RecordingNotifier};
    use chrono::TimeZone;
    use twine::status::LogLevel;

    fn state(per_minute: i64, per_day: i64) -> FailureState {
        FailureState {
            service_name: "Web".into(),
            notify_on_stop: true,
            recipients: vec!["ops@example.com".into()],
            max_per_minute: per_minute,
            max_per_day: per_day,
        }
    }

    fn responder(notifier: Arc<RecordingNotifier>) -> (FailureResponder, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::default());
        (FailureResponder::new(logger.clone(), notifier), logger)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn history_is_capped_and_ordered() {
        let (responder, _) = responder(Arc::new(RecordingNotifier::default()));
        let st = state(0, 0);

        for i in 0..8 {
            responder.handle_failure_at(&st, t0() + TimeDelta::hours(i));
        }

        let history = responder.failure_history("Web");
        assert_eq!(history.len(), MAX_FAILURE_HISTORY);
        assert_eq!(history[0], t0() + TimeDelta::hours(3));
        assert!(history.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn fourth_failure_in_a_minute_is_suppressed() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (responder, _) = responder(notifier.clone());
        let st = state(3, 0);

        for s in 0..3 {
            assert_eq!(
                responder.handle_failure_at(&st, t0() + TimeDelta::seconds(s)),
                FailureOutcome::Notified
            );
        }
        assert_eq!(
            responder.handle_failure_at(&st, t0() + TimeDelta::seconds(30)),
            FailureOutcome::Suppressed
        );
        assert_eq!(notifier.sent.lock().unwrap().len(), 3);
        assert_eq!(responder.failure_history("Web").len(), 4);
    }

    #[test]
    fn window_slides_after_a_minute() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (responder, _) = responder(notifier.clone());
        let st = state(3, 0);

        for s in 0..3 {
            responder.handle_failure_at(&st, t0() + TimeDelta::seconds(s));
        }
        assert_eq!(
            responder.handle_failure_at(&st, t0() + TimeDelta::seconds(61)),
            FailureOutcome::Notified
        );
        assert_eq!(notifier.sent.lock().unwrap().len(), 4);
    }

    #[test]
    fn daily_cap_applies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (responder, _) = responder(notifier.clone());
        let st = state(0, 2);

        assert_eq!(responder.handle_failure_at(&st, t0()), FailureOutcome::Notified);
        assert_eq!(
            responder.handle_failure_at(&st, t0() + TimeDelta::hours(2)),
            FailureOutcome::Notified
        );
        assert_eq!(
            responder.handle_failure_at(&st, t0() + TimeDelta::hours(4)),
            FailureOutcome::Suppressed
        );
        assert_eq!(
            responder.handle_failure_at(&st, t0() + TimeDelta::hours(27)),
            FailureOutcome::Notified
        );
    }

    #[test]
    fn negative_caps_are_unlimited() {
        let (responder, _) = responder(Arc::new(RecordingNotifier::default()));
        let st = state(-1, -1);

        for s in 0..10 {
            assert_eq!(
                responder.handle_failure_at(&st, t0() + TimeDelta::seconds(s)),
                FailureOutcome::Notified
            );
        }
    }

    #[test]
    fn records_without_sending_when_not_requested() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (responder, _) = responder(notifier.clone());
        let mut st = state(0, 0);
        st.notify_on_stop = false;

        assert_eq!(responder.handle_failure_at(&st, t0()), FailureOutcome::NotRequested);
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert_eq!(responder.failure_history("Web").len(), 1);
    }

    #[test]
    fn invalid_recipients_abort_the_send() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (responder, logger) = responder(notifier.clone());

        let mut st = state(0, 0);
        st.recipients = vec![];
        assert_eq!(responder.handle_failure_at(&st, t0()), FailureOutcome::InvalidRecipients);

        st.recipients = vec!["ops@example.com".into(), "  ".into()];
        assert_eq!(responder.handle_failure_at(&st, t0()), FailureOutcome::InvalidRecipients);

        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(logger.contains(LogLevel::Fail, "Cannot notify about 'Web'"));
        assert!(responder.exceptions().is_empty());
    }

    #[test]
    fn delivery_failure_is_captured_and_published() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let (responder, _) = responder(notifier);
        let events = responder.subscribe();

        assert_eq!(
            responder.handle_failure_at(&state(0, 0), t0()),
            FailureOutcome::DeliveryFailed
        );

        assert_eq!(responder.exceptions().len(), 1);
        match events.try_recv().unwrap() {
            ResponderEvent::ExceptionsUpdated { count, latest } => {
                assert_eq!(count, 1);
                assert!(latest.contains("smtp relay refused"));
            }
        }
    }

    #[test]
    fn notice_carries_recent_history() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (responder, _) = responder(notifier.clone());
        let st = state(0, 0);

        responder.handle_failure_at(&st, t0());
        responder.handle_failure_at(&st, t0() + TimeDelta::minutes(5));

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent[1].recent_failures, vec![t0(), t0() + TimeDelta::minutes(5)]);
        assert_eq!(sent[1].recipients, vec!["ops@example.com".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn command_notifier_reports_exit_status() {
        let notice = FailureNotice {
            service_name: "Web".into(),
            occurred_at: t0(),
            recent_failures: vec![t0()],
            recipients: vec!["ops@example.com".into()],
        };

        assert!(CommandNotifier::new("test \"$TRELLIS_SERVICE\" = Web")
            .send_service_failure(&notice)
            .is_ok());

        let err = CommandNotifier::new("exit 3")
            .send_service_failure(&notice)
            .unwrap_err();
        assert!(matches!(err, TwineError::Notify(_)));
    }
}

// src/core/events.rs

//! C8: Event Log. Every state transition and notable action is appended to
//! the cluster metadata store and, if configured, handed to an external
//! notification command. Both sinks are best-effort and independent of each
//! other: a failing notification command must never block or fail the
//! store write, and vice versa (§4.8). Fire-and-forget fan-out to both
//! sinks; errors are logged and swallowed rather than propagated.

use crate::core::db::DbConnector;
use crate::core::shellcmd::{ShellCommand, run_with_timeout};
use crate::core::types::{Event, EventType, NodeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Timeout applied to the notification command; it must not be allowed to
/// stall the engine indefinitely.
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);
const NOTIFICATION_KILL_GRACE: Duration = Duration::from_secs(2);

/// Builds an `Event` with a fresh wall-clock timestamp. The id is assigned
/// later by `EventLog::record` from the store's monotonic counter; `id` here
/// is a placeholder overwritten before the event is considered durable.
pub fn new_event(node_id: NodeId, event_type: EventType, success: bool, detail: impl Into<String>) -> Event {
    Event {
        id: 0,
        node_id,
        event_type,
        success,
        timestamp_ms: now_ms(),
        detail: detail.into(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The event-notification command template. `%n` is replaced with the event
/// type name and `%e` with the detail string before tokenization, mirroring
/// the `%p`/`%e`-style substitution repmgr's `event_notification_command`
/// supports.
#[derive(Debug, Clone)]
pub struct NotificationHook {
    pub command_template: String,
}

impl NotificationHook {
    fn render(&self, event: &Event) -> ShellCommand {
        let rendered = self
            .command_template
            .replace("%n", &format!("{:?}", event.event_type))
            .replace("%e", &event.detail)
            .replace("%i", &event.node_id.to_string())
            .replace("%s", if event.success { "1" } else { "0" });
        ShellCommand::parse(&rendered)
    }
}

/// Dual-sink event log: appends to the metadata store and, if configured,
/// invokes the notification hook. Both sinks run fire-and-forget; a failure
/// in either is logged, never returned to the caller, since an event record
/// is inherently best-effort (§4.8).
pub struct EventLog {
    db: Arc<dyn DbConnector>,
    hook: Option<NotificationHook>,
    next_local_id: AtomicU64,
}

impl EventLog {
    pub fn new(db: Arc<dyn DbConnector>, hook: Option<NotificationHook>) -> Self {
        Self {
            db,
            hook,
            next_local_id: AtomicU64::new(1),
        }
    }

    /// Records `event`: appends it to the store and fires the notification
    /// hook, if any, without waiting for either to affect the caller's
    /// control flow beyond logging failures.
    pub fn record(&self, mut event: Event) {
        event.id = self.next_local_id.fetch_add(1, Ordering::Relaxed);
        let db = self.db.clone();
        let node_id = event.node_id;
        let stored_event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = db.append_event(&stored_event).await {
                warn!(node_id, error = %e, "failed to append event to metadata store");
            }
        });

        if let Some(hook) = &self.hook {
            let cmd = hook.render(&event);
            tokio::spawn(async move {
                let outcome = run_with_timeout(&cmd, NOTIFICATION_TIMEOUT, NOTIFICATION_KILL_GRACE).await;
                if !outcome.success {
                    warn!(timed_out = outcome.timed_out, "event notification command failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::InMemoryDbConnector;

    #[tokio::test]
    async fn record_without_hook_does_not_panic() {
        let events = EventLog::new(Arc::new(InMemoryDbConnector::new()), None);
        events.record(new_event(1, EventType::StandbyPromote, true, "ok"));
        // give the spawned append-event task a chance to run
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn record_with_hook_renders_template_without_panicking() {
        let hook = NotificationHook {
            command_template: "/bin/echo %n %i %s".to_string(),
        };
        let events = EventLog::new(Arc::new(InMemoryDbConnector::new()), Some(hook));
        events.record(new_event(2, EventType::RepmgrdFailoverPromote, true, "promoted node 2"));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

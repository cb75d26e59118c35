use serde::Serialize;

use super::types::SyncClassification;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
    Warning,
}

/// The single user-facing message a sync pass produces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn for_sync(classification: SyncClassification, synced: usize, errored: usize, deferred: usize) -> Self {
        let (kind, title, mut message) = match classification {
            SyncClassification::Success => (
                NotificationKind::Success,
                "Sync complete",
                format!("{synced} responsibilit{} synced", plural_y(synced)),
            ),
            SyncClassification::Partial if errored == 0 => (
                NotificationKind::Warning,
                "Sync partially complete",
                format!("{synced} responsibilit{} synced", plural_y(synced)),
            ),
            SyncClassification::Partial => (
                NotificationKind::Warning,
                "Sync partially complete",
                format!("{errored} of {} failed to sync; they will be retried", synced + errored),
            ),
            SyncClassification::Failure => (
                NotificationKind::Error,
                "Sync failed",
                format!("{errored} responsibilit{} failed to sync", plural_y(errored)),
            ),
            SyncClassification::Offline => (
                NotificationKind::Info,
                "Offline",
                "Data saved locally and will sync when the connection returns".to_string(),
            ),
        };
        if deferred > 0 && classification != SyncClassification::Offline {
            message.push_str(&format!("; {deferred} deferred (offline)"));
        }
        Self { kind, title: title.to_string(), message }
    }
}

fn plural_y(n: usize) -> &'static str { if n == 1 { "y" } else { "ies" } }

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Routes notifications into the log stream.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &Notification) {
        match n.kind {
            NotificationKind::Success | NotificationKind::Info => {
                tracing::info!(kind = ?n.kind, title = %n.title, "{}", n.message)
            }
            NotificationKind::Warning => tracing::warn!(kind = ?n.kind, title = %n.title, "{}", n.message),
            NotificationKind::Error => tracing::error!(kind = ?n.kind, title = %n.title, "{}", n.message),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct CapturingNotifier {
        pub seen: Mutex<Vec<Notification>>,
    }

    impl Notifier for CapturingNotifier {
        fn notify(&self, n: &Notification) { self.seen.lock().unwrap().push(n.clone()); }
    }
}

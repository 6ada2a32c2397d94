//! # Optimistic Updates
//!
//! Local state changes applied before the backend confirms them, and the
//! toast channel used to report the ones that had to be rolled back.

use crate::errors::StoryTrackError;
use serde::Serialize;
use std::future::Future;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

/// A transient user-facing notification.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

/// Publishes toasts to whoever is rendering them.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Toast>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }

    fn publish(&self, level: ToastLevel, message: String) {
        // No renderer attached is fine; the toast is simply dropped.
        let _ = self.tx.send(Toast { level, message });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(ToastLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.publish(ToastLevel::Success, message.into());
    }

    /// Logs the message and shows it as an error toast.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.publish(ToastLevel::Error, message);
    }
}

/// Applies `apply` to the state, then awaits `write`. If the write fails,
/// `revert` is applied, an error toast is shown and the error is returned.
pub async fn apply_optimistic<S, T, Fut>(
    state: &RwLock<S>,
    notifier: &Notifier,
    action: &str,
    apply: impl FnOnce(&mut S),
    revert: impl FnOnce(&mut S),
    write: Fut,
) -> Result<T, StoryTrackError>
where
    Fut: Future<Output = Result<T, StoryTrackError>>,
{
    apply(&mut *state.write().await);

    match write.await {
        Ok(value) => {
            info!(action, "Optimistic update confirmed");
            Ok(value)
        }
        Err(e) => {
            revert(&mut *state.write().await);
            notifier.error(format!("Could not {action}: {}", e.user_message()));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_write_reverts_and_toasts() {
        let state = RwLock::new(0);
        let notifier = Notifier::default();
        let mut toasts = notifier.subscribe();

        let result: Result<(), _> = apply_optimistic(
            &state,
            &notifier,
            "save",
            |s| *s += 1,
            |s| *s -= 1,
            async { Err(StoryTrackError::Validation("nope".to_string())) },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(*state.read().await, 0);
        let toast = toasts.recv().await.unwrap();
        assert_eq!(toast.level, ToastLevel::Error);
        assert_eq!(toast.message, "Could not save: nope");
    }

    #[tokio::test]
    async fn test_successful_write_keeps_change() {
        let state = RwLock::new(vec![1]);
        let notifier = Notifier::default();
        let stored = apply_optimistic(
            &state,
            &notifier,
            "append",
            |s| s.push(2),
            |s| {
                s.pop();
            },
            async { Ok::<_, StoryTrackError>(2) },
        )
        .await
        .unwrap();
        assert_eq!(stored, 2);
        assert_eq!(*state.read().await, vec![1, 2]);
    }
}

use chrono::Utc;
use konnect_common::{Notification, NotificationId, NotificationType, UserId};
use sled::transaction::ConflictableTransactionError::Abort;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::state::{read_doc, write_doc, State, TxResult};

/// Keys are `<recipient>/<notification id>`, so one prefix scan yields a user's inbox.
fn inbox_prefix(recipient: &UserId) -> String {
    format!("{}/", recipient)
}

fn notification_key(recipient: &UserId, id: &NotificationId) -> String {
    format!("{}/{}", recipient, id)
}

impl State {
    pub fn create_notification(
        &self,
        recipient: &UserId,
        kind: NotificationType,
        reference_id: Option<String>,
        message: impl Into<String>,
    ) -> Result<Notification> {
        #[cfg(test)]
        self.fail_if_broken()?;
        let notification = Notification {
            id: NotificationId::new(),
            recipient: recipient.clone(),
            kind,
            reference_id,
            message: message.into(),
            read: false,
            created_at: Utc::now(),
        };
        self.notifications.insert(
            notification_key(recipient, &notification.id),
            serde_json::to_vec(&notification)?,
        )?;
        debug!("created {:?} notification {} for {}", kind, notification.id, recipient);
        Ok(notification)
    }

    /// Best effort: a failure is logged and never reaches the action that triggered it.
    pub fn emit_notification(
        &self,
        recipient: &UserId,
        kind: NotificationType,
        reference_id: Option<String>,
        message: impl Into<String>,
    ) {
        if let Err(e) = self.create_notification(recipient, kind, reference_id, message) {
            warn!("dropping {:?} notification for {}: {}", kind, recipient, e);
        }
    }

    #[cfg(test)]
    fn fail_if_broken(&self) -> Result<()> {
        if self.break_notifications.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("notification store unavailable")));
        }
        Ok(())
    }

    /// Newest first.
    pub fn notifications_for(&self, recipient: &UserId) -> Result<Vec<Notification>> {
        let mut notifications = self
            .notifications
            .scan_prefix(inbox_prefix(recipient))
            .values()
            .map(|bytes| -> Result<Notification> { Ok(serde_json::from_slice(&bytes?)?) })
            .collect::<Result<Vec<_>>>()?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(notifications)
    }

    pub fn unread_count(&self, recipient: &UserId) -> Result<usize> {
        Ok(self
            .notifications_for(recipient)?
            .iter()
            .filter(|n| !n.read)
            .count())
    }

    /// A notification owned by someone else is reported as missing.
    pub fn mark_notification_read(&self, recipient: &UserId, id: &NotificationId) -> Result<()> {
        let key = notification_key(recipient, id);
        self.notifications.transaction(|tx| -> TxResult<()> {
            let mut notification = read_doc::<Notification>(tx, key.as_bytes())?
                .ok_or(Abort(AppError::NotificationNotFound))?;
            if !notification.read {
                notification.read = true;
                write_doc(tx, key.as_bytes(), &notification)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Returns how many notifications were flipped to read.
    pub fn mark_all_notifications_read(&self, recipient: &UserId) -> Result<usize> {
        let mut batch = sled::Batch::default();
        let mut flipped = 0;
        for entry in self.notifications.scan_prefix(inbox_prefix(recipient)) {
            let (key, bytes) = entry?;
            let mut notification: Notification = serde_json::from_slice(&bytes)?;
            if !notification.read {
                notification.read = true;
                batch.insert(key, serde_json::to_vec(&notification)?);
                flipped += 1;
            }
        }
        self.notifications.apply_batch(batch)?;
        debug!("marked {} notifications read for {}", flipped, recipient);
        Ok(flipped)
    }
}

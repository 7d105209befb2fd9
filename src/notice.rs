use crate::{
    error::{missing, AppError, AppResult},
    library::{require_text, Library},
    models::{
        Feedback, FeedbackData, NewFeedback, NewNotification, Notification, NotificationData,
        NotificationKind, User,
    },
};
use chrono::Utc;

impl Library {
    pub async fn notifications(&self, user: &User) -> AppResult<Vec<Notification>> {
        Ok(self.store.notifications_of(user.id).await?)
    }

    pub async fn unread_count(&self, user: &User) -> AppResult<u32> {
        let notifications = self.store.notifications_of(user.id).await?;
        Ok(notifications.iter().filter(|item| !item.read).count() as u32)
    }

    #[tracing::instrument(skip(self, admin, data), fields(admin_id = admin.id, to = data.user_id))]
    pub async fn notify(&self, admin: &User, data: NotificationData) -> AppResult<Notification> {
        let notification = NewNotification {
            user_id: data.user_id,
            message: require_text("message", &data.message)?,
            kind: data.kind.unwrap_or(NotificationKind::General),
            book_id: data.book_id,
            created_by: Some(admin.id),
        };

        let notification = self
            .store
            .insert_notification(notification)
            .await
            .map_err(missing("recipient"))?;
        tracing::info!(notification_id = notification.id, "sent notification");

        Ok(notification)
    }

    // Marks one of the caller's notifications as read. Marking an already read
    // notification succeeds and changes nothing.
    pub async fn mark_read(&self, user: &User, id: i64) -> AppResult<Notification> {
        let notification = self
            .store
            .find_notification(id)
            .await
            .map_err(missing("notification"))?;
        if notification.user_id != user.id {
            return Err(AppError::Unauthenticated(
                "not authorized to update this notification".to_string(),
            ));
        }
        if notification.read {
            return Ok(notification);
        }

        Ok(self
            .store
            .mark_read(id)
            .await
            .map_err(missing("notification"))?)
    }

    pub async fn mark_all_read(&self, user: &User) -> AppResult<u64> {
        Ok(self.store.mark_all_read(user.id).await?)
    }

    // Sends a REMINDER to the holder of every overdue loan.
    #[tracing::instrument(skip(self, admin), fields(admin_id = admin.id))]
    pub async fn send_reminders(&self, admin: &User) -> AppResult<u32> {
        let now = Utc::now();
        let overdue = self.store.overdue_loans(now).await?;

        let mut sent = 0;
        for loan in overdue {
            let title = match self.store.find_book(loan.book_id).await {
                Ok(book) => book.title,
                Err(_) => format!("book #{}", loan.book_id),
            };
            let days = (now - loan.return_date).num_days();
            let notification = NewNotification {
                user_id: loan.user_id,
                message: format!("\"{title}\" was due {days} day(s) ago. Please return it."),
                kind: NotificationKind::Reminder,
                book_id: Some(loan.book_id),
                created_by: Some(admin.id),
            };
            match self.store.insert_notification(notification).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    tracing::warn!(loan_id = loan.id, error = %e, "failed to send reminder")
                }
            }
        }
        tracing::info!(sent, "sent overdue reminders");

        Ok(sent)
    }

    pub async fn submit_feedback(&self, data: FeedbackData) -> AppResult<Feedback> {
        let email = data.email.trim().to_string();
        if !email.contains('@') {
            return Err(AppError::validation("email address is invalid"));
        }
        let feedback = NewFeedback {
            name: require_text("name", &data.name)?,
            email,
            message: require_text("message", &data.message)?,
        };

        let feedback = self.store.insert_feedback(feedback).await?;
        tracing::info!(feedback_id = feedback.id, "received feedback");

        Ok(feedback)
    }

    pub async fn feedback(&self) -> AppResult<Vec<Feedback>> {
        Ok(self.store.feedback().await?)
    }
}

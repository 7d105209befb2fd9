use crate::{
    error::{missing, AppResult},
    library::Library,
    models::{Book, Enqueued, Loan, LoanView, NewNotification, NotificationKind, User},
};
use chrono::{Duration, Utc};

impl Library {
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn borrow(&self, user: &User, book_id: i64) -> AppResult<Loan> {
        let now = Utc::now();
        let due = now + Duration::days(self.config.loan_days);

        let checkout = self
            .store
            .checkout(user.id, book_id, now, due)
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "borrow refused");
                missing("book")(e)
            })?;
        tracing::info!(
            loan_id = checkout.loan.id,
            available = checkout.book.available_quantity,
            "borrowed book"
        );

        Ok(checkout.loan)
    }

    // Closes the caller's loan. When someone is waiting for the title, the
    // head of the waitlist is taken off and told the book is available.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn return_book(&self, user: &User, book_id: i64) -> AppResult<Loan> {
        let checkin = self
            .store
            .checkin(user.id, book_id, Utc::now())
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "return refused");
                missing("book")(e)
            })?;
        tracing::info!(
            loan_id = checkin.loan.id,
            available = checkin.book.available_quantity,
            "returned book"
        );

        if let Some(next) = checkin.next_in_line {
            self.notify_available(next, &checkin.book).await;
        }

        Ok(checkin.loan)
    }

    async fn notify_available(&self, user_id: i64, book: &Book) {
        let notification = NewNotification {
            user_id,
            message: format!("\"{}\" is now available to borrow.", book.title),
            kind: NotificationKind::Availability,
            book_id: Some(book.id),
            created_by: None,
        };

        match self.store.insert_notification(notification).await {
            Ok(notification) => tracing::info!(
                notification_id = notification.id,
                waiting_user = user_id,
                "notified next reader"
            ),
            Err(e) => tracing::warn!(waiting_user = user_id, error = %e, "failed to notify next reader"),
        }
    }

    pub async fn my_books(&self, user: &User) -> AppResult<Vec<LoanView>> {
        Ok(self.store.loans_of(user.id).await?)
    }

    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn reserve(&self, user: &User, book_id: i64) -> AppResult<Enqueued> {
        let enqueued = self
            .store
            .enqueue(book_id, user.id, Utc::now())
            .await
            .map_err(missing("book"))?;
        tracing::info!(
            position = enqueued.position,
            added = enqueued.added,
            "joined waitlist"
        );

        Ok(enqueued)
    }

    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn leave_waitlist(&self, user: &User, book_id: i64) -> AppResult<bool> {
        let removed = self
            .store
            .dequeue(book_id, user.id)
            .await
            .map_err(missing("book"))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod test {
    use crate::error::AppError;
    use crate::library::testing;
    use crate::models::{LoanStatus, NotificationKind};
    use chrono::Duration;

    #[actix_web::test]
    async fn test_borrow_and_return_single_copy() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        let alice = testing::student(&library, "Alice").await.user;
        let bob = testing::student(&library, "Bob").await.user;
        let book = testing::book(&library, &admin, "TAOCP", 1).await;

        let loan = library.borrow(&alice, book.id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.return_date - loan.borrow_date, Duration::days(15));
        assert_eq!(library.book(book.id).await.unwrap().available_quantity, 0);

        let err = library.borrow(&bob, book.id).await.unwrap_err();
        assert!(matches!(err, AppError::Rejected(_)));

        let loan = library.return_book(&alice, book.id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Returned);
        assert!(loan.actual_return_date.is_some());
        assert_eq!(library.book(book.id).await.unwrap().available_quantity, 1);

        let loans = library.my_books(&alice).await.unwrap();
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].loan.status, LoanStatus::Returned);
        assert_eq!(loans[0].book.as_ref().unwrap().title, "TAOCP");
    }

    #[actix_web::test]
    async fn test_no_duplicate_active_loan() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        let alice = testing::student(&library, "Alice").await.user;
        let book = testing::book(&library, &admin, "TAOCP", 3).await;

        library.borrow(&alice, book.id).await.unwrap();
        let err = library.borrow(&alice, book.id).await.unwrap_err();
        assert!(matches!(err, AppError::Rejected(_)));
        assert_eq!(library.book(book.id).await.unwrap().available_quantity, 2);

        // a returned loan does not block borrowing again
        library.return_book(&alice, book.id).await.unwrap();
        library.borrow(&alice, book.id).await.unwrap();

        let loans = library.my_books(&alice).await.unwrap();
        let active = loans
            .iter()
            .filter(|view| view.loan.status == LoanStatus::Active)
            .count();
        assert_eq!(active, 1);
    }

    #[actix_web::test]
    async fn test_return_flips_exactly_one_loan() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        let alice = testing::student(&library, "Alice").await.user;
        let bob = testing::student(&library, "Bob").await.user;
        let book = testing::book(&library, &admin, "TAOCP", 2).await;

        library.borrow(&alice, book.id).await.unwrap();
        library.borrow(&bob, book.id).await.unwrap();
        library.return_book(&alice, book.id).await.unwrap();

        assert_eq!(library.book(book.id).await.unwrap().available_quantity, 1);
        let bob_loans = library.my_books(&bob).await.unwrap();
        assert_eq!(bob_loans[0].loan.status, LoanStatus::Active);

        let err = library.return_book(&alice, book.id).await.unwrap_err();
        assert!(matches!(err, AppError::Rejected(_)));
        assert_eq!(library.book(book.id).await.unwrap().available_quantity, 1);
    }

    #[actix_web::test]
    async fn test_missing_book() {
        let library = testing::library();
        let alice = testing::student(&library, "Alice").await.user;

        let err = library.borrow(&alice, 999).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = library.return_book(&alice, 999).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = library.reserve(&alice, 999).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[actix_web::test]
    async fn test_concurrent_borrows_of_last_copy() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        let book = testing::book(&library, &admin, "TAOCP", 1).await;
        let book_id = book.id;

        let mut handles = vec![];
        for i in 0..8 {
            let user = testing::student(&library, &format!("Reader{i}")).await.user;
            let library = library.clone();
            handles.push(actix_web::rt::spawn(async move {
                library.borrow(&user, book_id).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::Rejected(_)) => (),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let book = library.book(book.id).await.unwrap();
        assert_eq!(succeeded, 1);
        assert_eq!(book.available_quantity, 0);
        assert!(book.available_quantity <= book.total_quantity);
    }

    #[actix_web::test]
    async fn test_waitlist_join_is_idempotent() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        let alice = testing::student(&library, "Alice").await.user;
        let bob = testing::student(&library, "Bob").await.user;
        let book = testing::book(&library, &admin, "TAOCP", 1).await;

        // copies on the shelf: borrow instead
        let err = library.reserve(&bob, book.id).await.unwrap_err();
        assert!(matches!(err, AppError::Rejected(_)));

        library.borrow(&alice, book.id).await.unwrap();
        let first = library.reserve(&bob, book.id).await.unwrap();
        let second = library.reserve(&bob, book.id).await.unwrap();
        assert!(first.added);
        assert!(!second.added);
        assert_eq!(second.position, 1);
        assert_eq!(second.queue_length, 1);
        assert_eq!(library.book(book.id).await.unwrap().queue, vec![bob.id]);

        assert!(library.leave_waitlist(&bob, book.id).await.unwrap());
        assert!(!library.leave_waitlist(&bob, book.id).await.unwrap());
    }

    #[actix_web::test]
    async fn test_return_drains_waitlist() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        let alice = testing::student(&library, "Alice").await.user;
        let bob = testing::student(&library, "Bob").await.user;
        let carol = testing::student(&library, "Carol").await.user;
        let book = testing::book(&library, &admin, "TAOCP", 1).await;

        library.borrow(&alice, book.id).await.unwrap();
        library.reserve(&bob, book.id).await.unwrap();
        let carol_spot = library.reserve(&carol, book.id).await.unwrap();
        assert_eq!(carol_spot.position, 2);

        library.return_book(&alice, book.id).await.unwrap();

        let book = library.book(book.id).await.unwrap();
        assert_eq!(book.queue, vec![carol.id]);
        assert_eq!(book.available_quantity, 1);

        let notifications = library.notifications(&bob).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Availability);
        assert_eq!(notifications[0].book_id, Some(book.id));
        assert!(library.notifications(&carol).await.unwrap().is_empty());

        // borrowing takes the reader off the waitlist
        library.reserve(&alice, book.id).await.unwrap_err();
        library.borrow(&bob, book.id).await.unwrap();
        library.reserve(&alice, book.id).await.unwrap();
        library.borrow(&carol, book.id).await.unwrap_err();
        assert_eq!(library.book(book.id).await.unwrap().queue, vec![carol.id, alice.id]);
    }
}

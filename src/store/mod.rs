use crate::models::{
    Activity, AdminStats, Book, BookChunk, BookFilter, BookPatch, CategoryCount, Checkin,
    Checkout, Enqueued, Feedback, Loan, LoanView, NewActivity, NewBook, NewFeedback,
    NewNotification, NewUser, Notification, User, UserPatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type Result<T> = ::std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot find object.")]
    NotFound,
    #[error("{0}")]
    Conflict(Conflict),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

// A write that was refused because it would break a store invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    EmailTaken,
    NoCopyAvailable,
    AlreadyBorrowed,
    NotBorrowed,
    CopiesAvailable,
    CopiesOnLoan,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Conflict::EmailTaken => "email is already registered",
            Conflict::NoCopyAvailable => "no copy of this book is available",
            Conflict::AlreadyBorrowed => "you have already borrowed this book",
            Conflict::NotBorrowed => "you have no active borrow of this book",
            Conflict::CopiesAvailable => "copies are available, borrow the book instead",
            Conflict::CopiesOnLoan => "copies of this book are still on loan",
        };
        f.write_str(text)
    }
}

// Persistence seam of the library. Every method is one atomic unit: the
// multi-record operations (`checkout`, `checkin`, `enqueue`, `update_book`,
// `delete_book`) either apply completely or not at all.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> Result<User>;
    async fn find_user(&self, id: i64) -> Result<User>;
    async fn find_user_by_email(&self, email: &str) -> Result<User>;
    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<User>;

    async fn insert_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
    // Resolves an unexpired session to its user.
    async fn find_session_user(&self, token: &str, now: DateTime<Utc>) -> Result<User>;
    async fn delete_session(&self, token: &str) -> Result<bool>;

    async fn insert_book(&self, book: NewBook) -> Result<Book>;
    async fn find_book(&self, id: i64) -> Result<Book>;
    async fn query_books(&self, filter: &BookFilter, page_size: u32, page: u32)
        -> Result<BookChunk>;
    // Fails with `CopiesOnLoan` when a new total would not cover the loaned copies.
    async fn update_book(&self, id: i64, patch: BookPatch) -> Result<Book>;
    // Fails with `CopiesOnLoan` while any copy is borrowed.
    async fn delete_book(&self, id: i64) -> Result<Book>;
    async fn category_counts(&self) -> Result<Vec<CategoryCount>>;

    // Takes one copy and opens an Active loan, dropping the borrower from the
    // waitlist.
    async fn checkout(
        &self,
        user_id: i64,
        book_id: i64,
        borrowed_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Result<Checkout>;
    // Closes the Active loan, puts the copy back and pops the waitlist head.
    async fn checkin(&self, user_id: i64, book_id: i64, returned_at: DateTime<Utc>)
        -> Result<Checkin>;
    async fn loans_of(&self, user_id: i64) -> Result<Vec<LoanView>>;
    async fn overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>>;
    // Joins the waitlist; only allowed while no copy is available.
    async fn enqueue(&self, book_id: i64, user_id: i64, joined_at: DateTime<Utc>)
        -> Result<Enqueued>;
    async fn dequeue(&self, book_id: i64, user_id: i64) -> Result<bool>;

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification>;
    async fn notifications_of(&self, user_id: i64) -> Result<Vec<Notification>>;
    async fn find_notification(&self, id: i64) -> Result<Notification>;
    async fn mark_read(&self, id: i64) -> Result<Notification>;
    async fn mark_all_read(&self, user_id: i64) -> Result<u64>;

    async fn insert_activity(&self, activity: NewActivity) -> Result<Activity>;
    async fn recent_activities(&self, limit: u32) -> Result<Vec<Activity>>;

    async fn insert_feedback(&self, feedback: NewFeedback) -> Result<Feedback>;
    async fn feedback(&self) -> Result<Vec<Feedback>>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<AdminStats>;
}

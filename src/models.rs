use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "student" => Some(Role::Student),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub department: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    Active,
    Returned,
}

impl LoanStatus {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "Active" => Some(LoanStatus::Active),
            "Returned" => Some(LoanStatus::Returned),
            _ => None,
        }
    }
}

// one entry of a user's borrow history
#[derive(Debug, Clone, Serialize)]
pub struct Loan {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub borrow_date: DateTime<Utc>,
    pub return_date: DateTime<Utc>,
    pub actual_return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
}

impl Loan {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::Active && self.return_date < now
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoanView {
    #[serde(flatten)]
    pub loan: Loan,
    pub book: Option<BookSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub category: String,
    pub description: String,
    pub image_url: Option<String>,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub queue: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn on_loan(&self) -> i32 {
        self.total_quantity - self.available_quantity
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub image_url: Option<String>,
}

impl From<Book> for BookSummary {
    fn from(val: Book) -> Self {
        BookSummary {
            id: val.id,
            title: val.title,
            author: val.author,
            isbn: val.isbn,
            image_url: val.image_url,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BookChunk {
    pub items: Vec<Book>,
    pub total_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Availability,
    Reminder,
    General,
    AdminAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Availability => "AVAILABILITY",
            NotificationKind::Reminder => "REMINDER",
            NotificationKind::General => "GENERAL",
            NotificationKind::AdminAlert => "ADMIN_ALERT",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "AVAILABILITY" => Some(NotificationKind::Availability),
            "REMINDER" => Some(NotificationKind::Reminder),
            "GENERAL" => Some(NotificationKind::General),
            "ADMIN_ALERT" => Some(NotificationKind::AdminAlert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub book_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: i64,
    pub action: String,
    pub actor: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// write-side records handed to the store

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub department: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub category: String,
    pub description: String,
    pub image_url: Option<String>,
    pub total_quantity: i32,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub total_quantity: Option<i32>,
}

impl BookPatch {
    // Applies the patch in place. Changing `total_quantity` moves
    // `available_quantity` by the same delta; `false` means the new total
    // would not cover the copies currently on loan and nothing was changed.
    pub fn apply(self, book: &mut Book) -> bool {
        if let Some(total) = self.total_quantity {
            let on_loan = book.on_loan();
            if total < on_loan {
                return false;
            }
            book.total_quantity = total;
            book.available_quantity = total - on_loan;
        }
        if let Some(title) = self.title {
            book.title = title;
        }
        if let Some(author) = self.author {
            book.author = author;
        }
        if let Some(isbn) = self.isbn {
            book.isbn = isbn;
        }
        if let Some(category) = self.category {
            book.category = category;
        }
        if let Some(description) = self.description {
            book.description = description;
        }
        if let Some(image_url) = self.image_url {
            book.image_url = Some(image_url).filter(|url| !url.is_empty());
        }
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct BookFilter {
    pub text: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub message: String,
    pub kind: NotificationKind,
    pub book_id: Option<i64>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub action: String,
    pub actor: String,
    pub details: String,
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub name: String,
    pub email: String,
    pub message: String,
}

// results of multi-record store operations

#[derive(Debug, Clone)]
pub struct Checkout {
    pub loan: Loan,
    pub book: Book,
}

#[derive(Debug, Clone)]
pub struct Checkin {
    pub loan: Loan,
    pub book: Book,
    // user popped off the head of the waitlist, if any
    pub next_in_line: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Enqueued {
    pub book_id: i64,
    pub position: u32,
    pub queue_length: u32,
    pub added: bool,
}

#[derive(Debug, Clone)]
pub struct CategoryCount {
    pub category: String,
    pub titles: i64,
    pub copies: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UdcCount {
    pub code: String,
    pub titles: i64,
    pub copies: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct AdminStats {
    pub students: i64,
    pub admins: i64,
    pub titles: i64,
    pub total_copies: i64,
    pub available_copies: i64,
    pub active_loans: i64,
    pub overdue_loans: i64,
    pub waitlist_entries: i64,
    pub feedback_entries: i64,
}

// request bodies

#[derive(Debug, Deserialize)]
pub struct RegisterData {
    pub name: String,
    pub email: String,
    pub password: String,
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResult {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileData {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub borrowed_books: Vec<Loan>,
}

#[derive(Debug, Deserialize)]
pub struct BookIdData {
    #[serde(alias = "bookId")]
    pub book_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct BookData {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub image_url: Option<String>,
    pub total_quantity: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct BookQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub page_size: Option<u32>,
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationData {
    pub user_id: i64,
    pub message: String,
    pub kind: Option<NotificationKind>,
    pub book_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: u32,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackData {
    pub name: String,
    pub email: String,
    pub message: String,
}

use super::{Conflict, Result, Store, StoreError};
use crate::models::{
    Activity, AdminStats, Book, BookChunk, BookFilter, BookPatch, BookSummary, CategoryCount,
    Checkin, Checkout, Enqueued, Feedback, Loan, LoanStatus, LoanView, NewActivity, NewBook,
    NewFeedback, NewNotification, NewUser, Notification, NotificationKind, Role, User, UserPatch,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, PgPool, Postgres};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, department, created_at";

const LOAN_COLUMNS: &str =
    "id, user_id, book_id, borrow_date, return_date, actual_return_date, status";

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, message, kind, read, book_id, created_by, created_at";

const BOOK_SELECT: &str = "SELECT b.id, b.title, b.author, b.isbn, b.category, b.description, \
    b.image_url, b.total_quantity, b.available_quantity, \
    ARRAY(SELECT q.user_id FROM book_queue q WHERE q.book_id = b.id ORDER BY q.seq) AS queue, \
    b.created_at FROM books b";

const BOOK_FILTER: &str = "($1::TEXT IS NULL OR b.title ILIKE $1 OR b.author ILIKE $1 \
    OR b.isbn ILIKE $1) AND ($2::TEXT IS NULL OR b.category LIKE $2)";

// PostgreSQL backed store. Multi-record operations run in one transaction
// each and rely on guarded updates plus the schema constraints in
// `migrations/`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(db_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(db_url).await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(PgStore { pool })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(val: sqlx::Error) -> Self {
        match val {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            e => StoreError::Internal(anyhow!(e)),
        }
    }
}

fn has_code(e: &sqlx::Error, code: &str) -> bool {
    match e {
        sqlx::Error::Database(e) => e.code().as_deref() == Some(code),
        _ => false,
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    has_code(e, "23505")
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    has_code(e, "23503")
}

fn like_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    department: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(val: UserRow) -> anyhow::Result<Self> {
        Ok(User {
            id: val.id,
            name: val.name,
            email: val.email,
            password_hash: val.password_hash,
            role: Role::parse(&val.role).context("unknown role")?,
            department: val.department,
            created_at: val.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BookRow {
    id: i64,
    title: String,
    author: String,
    isbn: String,
    category: String,
    description: String,
    image_url: Option<String>,
    total_quantity: i32,
    available_quantity: i32,
    queue: Vec<i64>,
    created_at: DateTime<Utc>,
}

impl From<BookRow> for Book {
    fn from(val: BookRow) -> Self {
        Book {
            id: val.id,
            title: val.title,
            author: val.author,
            isbn: val.isbn,
            category: val.category,
            description: val.description,
            image_url: val.image_url,
            total_quantity: val.total_quantity,
            available_quantity: val.available_quantity,
            queue: val.queue,
            created_at: val.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct LoanRow {
    id: i64,
    user_id: i64,
    book_id: i64,
    borrow_date: DateTime<Utc>,
    return_date: DateTime<Utc>,
    actual_return_date: Option<DateTime<Utc>>,
    status: String,
}

impl TryFrom<LoanRow> for Loan {
    type Error = anyhow::Error;

    fn try_from(val: LoanRow) -> anyhow::Result<Self> {
        Ok(Loan {
            id: val.id,
            user_id: val.user_id,
            book_id: val.book_id,
            borrow_date: val.borrow_date,
            return_date: val.return_date,
            actual_return_date: val.actual_return_date,
            status: LoanStatus::parse(&val.status).context("unknown loan status")?,
        })
    }
}

#[derive(Debug, FromRow)]
struct LoanViewRow {
    id: i64,
    user_id: i64,
    book_id: i64,
    borrow_date: DateTime<Utc>,
    return_date: DateTime<Utc>,
    actual_return_date: Option<DateTime<Utc>>,
    status: String,
    title: Option<String>,
    author: Option<String>,
    isbn: Option<String>,
    image_url: Option<String>,
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: i64,
    user_id: i64,
    message: String,
    kind: String,
    read: bool,
    book_id: Option<i64>,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(val: NotificationRow) -> anyhow::Result<Self> {
        Ok(Notification {
            id: val.id,
            user_id: val.user_id,
            message: val.message,
            kind: NotificationKind::parse(&val.kind).context("unknown notification kind")?,
            read: val.read,
            book_id: val.book_id,
            created_by: val.created_by,
            created_at: val.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ActivityRow {
    id: i64,
    action: String,
    actor: String,
    details: String,
    created_at: DateTime<Utc>,
}

impl From<ActivityRow> for Activity {
    fn from(val: ActivityRow) -> Self {
        Activity {
            id: val.id,
            action: val.action,
            actor: val.actor,
            details: val.details,
            created_at: val.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct FeedbackRow {
    id: i64,
    name: String,
    email: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl From<FeedbackRow> for Feedback {
    fn from(val: FeedbackRow) -> Self {
        Feedback {
            id: val.id,
            name: val.name,
            email: val.email,
            message: val.message,
            created_at: val.created_at,
        }
    }
}

async fn fetch_book<'e, E>(executor: E, id: i64) -> Result<Book>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("{BOOK_SELECT} WHERE b.id = $1");
    let row = sqlx::query_as::<_, BookRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(StoreError::NotFound)?;

    Ok(row.into())
}

async fn book_exists<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM books WHERE id = $1)")
        .bind(id)
        .fetch_one(executor)
        .await?;

    Ok(exists)
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let sql = format!(
            "INSERT INTO users (name, email, password_hash, role, department) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.name)
            .bind(user.email)
            .bind(user.password_hash)
            .bind(user.role.as_str())
            .bind(user.department)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match is_unique_violation(&e) {
                true => StoreError::Conflict(Conflict::EmailTaken),
                false => e.into(),
            })?;

        Ok(row.try_into()?)
    }

    async fn find_user(&self, id: i64) -> Result<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_into()?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_into()?)
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<User> {
        let sql = format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email), \
             password_hash = COALESCE($4, password_hash), \
             department = CASE WHEN $5::TEXT IS NULL THEN department ELSE NULLIF($5, '') END \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(patch.name)
            .bind(patch.email)
            .bind(patch.password_hash)
            .bind(patch.department)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match is_unique_violation(&e) {
                true => StoreError::Conflict(Conflict::EmailTaken),
                false => e.into(),
            })?;

        Ok(row.try_into()?)
    }

    async fn insert_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match is_foreign_key_violation(&e) {
                true => StoreError::NotFound,
                false => e.into(),
            })?;
        Ok(())
    }

    async fn find_session_user(&self, token: &str, now: DateTime<Utc>) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT u.id, u.name, u.email, u.password_hash, u.role, u.department, u.created_at \
             FROM sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.token = $1 AND s.expires_at > $2",
        )
        .bind(token)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_into()?)
    }

    async fn delete_session(&self, token: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn insert_book(&self, book: NewBook) -> Result<Book> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO books (title, author, isbn, category, description, image_url, \
             total_quantity, available_quantity) VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
             RETURNING id",
        )
        .bind(book.title)
        .bind(book.author)
        .bind(book.isbn)
        .bind(book.category)
        .bind(book.description)
        .bind(book.image_url)
        .bind(book.total_quantity)
        .fetch_one(&self.pool)
        .await?;

        fetch_book(&self.pool, id).await
    }

    async fn find_book(&self, id: i64) -> Result<Book> {
        fetch_book(&self.pool, id).await
    }

    async fn query_books(
        &self,
        filter: &BookFilter,
        page_size: u32,
        page: u32,
    ) -> Result<BookChunk> {
        let text = filter
            .text
            .as_deref()
            .map(|text| format!("%{}%", like_escape(text)));
        let category = filter
            .category
            .as_deref()
            .map(|category| format!("{}%", like_escape(category)));

        let offset = (page_size as u64).saturating_mul(page as u64);
        let sql = format!("{BOOK_SELECT} WHERE {BOOK_FILTER} ORDER BY b.title, b.id OFFSET $3 LIMIT $4");
        let items = sqlx::query_as::<_, BookRow>(&sql)
            .bind(&text)
            .bind(&category)
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .bind(page_size as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Book::from)
            .collect();

        let sql = format!("SELECT COUNT(*) FROM books b WHERE {BOOK_FILTER}");
        let total_count: i64 = sqlx::query_scalar(&sql)
            .bind(&text)
            .bind(&category)
            .fetch_one(&self.pool)
            .await?;

        Ok(BookChunk {
            items,
            total_count: total_count as u32,
        })
    }

    async fn update_book(&self, id: i64, patch: BookPatch) -> Result<Book> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_one(&mut tx)
            .await?;

        let mut book = fetch_book(&mut tx, id).await?;
        if !patch.apply(&mut book) {
            return Err(StoreError::Conflict(Conflict::CopiesOnLoan));
        }

        sqlx::query(
            "UPDATE books SET title = $2, author = $3, isbn = $4, category = $5, \
             description = $6, image_url = $7, total_quantity = $8, available_quantity = $9 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.category)
        .bind(&book.description)
        .bind(&book.image_url)
        .bind(book.total_quantity)
        .bind(book.available_quantity)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(book)
    }

    async fn delete_book(&self, id: i64) -> Result<Book> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_one(&mut tx)
            .await?;

        let book = fetch_book(&mut tx, id).await?;
        if book.on_loan() > 0 {
            return Err(StoreError::Conflict(Conflict::CopiesOnLoan));
        }

        sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        Ok(book)
    }

    async fn category_counts(&self) -> Result<Vec<CategoryCount>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*), COALESCE(SUM(total_quantity), 0)::BIGINT \
             FROM books GROUP BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(category, titles, copies)| CategoryCount {
                category,
                titles,
                copies,
            })
            .collect())
    }

    async fn checkout(
        &self,
        user_id: i64,
        book_id: i64,
        borrowed_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Result<Checkout> {
        let mut tx = self.pool.begin().await?;

        // the guarded decrement also takes the row lock that serializes borrowers
        let taken = sqlx::query(
            "UPDATE books SET available_quantity = available_quantity - 1 \
             WHERE id = $1 AND available_quantity > 0",
        )
        .bind(book_id)
        .execute(&mut tx)
        .await?
        .rows_affected();

        if taken == 0 {
            return Err(match book_exists(&mut tx, book_id).await? {
                true => StoreError::Conflict(Conflict::NoCopyAvailable),
                false => StoreError::NotFound,
            });
        }

        let sql = format!(
            "INSERT INTO loans (user_id, book_id, borrow_date, return_date, status) \
             VALUES ($1, $2, $3, $4, 'Active') RETURNING {LOAN_COLUMNS}"
        );
        let loan: Loan = sqlx::query_as::<_, LoanRow>(&sql)
            .bind(user_id)
            .bind(book_id)
            .bind(borrowed_at)
            .bind(due_at)
            .fetch_one(&mut tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(Conflict::AlreadyBorrowed)
                } else if is_foreign_key_violation(&e) {
                    StoreError::NotFound
                } else {
                    e.into()
                }
            })?
            .try_into()?;

        sqlx::query("DELETE FROM book_queue WHERE book_id = $1 AND user_id = $2")
            .bind(book_id)
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        let book = fetch_book(&mut tx, book_id).await?;
        tx.commit().await?;

        Ok(Checkout { loan, book })
    }

    async fn checkin(
        &self,
        user_id: i64,
        book_id: i64,
        returned_at: DateTime<Utc>,
    ) -> Result<Checkin> {
        let mut tx = self.pool.begin().await?;

        // book row first, same order as checkout
        sqlx::query("SELECT id FROM books WHERE id = $1 FOR UPDATE")
            .bind(book_id)
            .fetch_optional(&mut tx)
            .await?
            .ok_or(StoreError::NotFound)?;

        let sql = format!(
            "UPDATE loans SET status = 'Returned', actual_return_date = $3 \
             WHERE user_id = $1 AND book_id = $2 AND status = 'Active' RETURNING {LOAN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, LoanRow>(&sql)
            .bind(user_id)
            .bind(book_id)
            .bind(returned_at)
            .fetch_optional(&mut tx)
            .await?;

        let loan: Loan = row
            .ok_or(StoreError::Conflict(Conflict::NotBorrowed))?
            .try_into()?;

        sqlx::query("UPDATE books SET available_quantity = available_quantity + 1 WHERE id = $1")
            .bind(book_id)
            .execute(&mut tx)
            .await?;

        let next_in_line: Option<i64> = sqlx::query_scalar(
            "DELETE FROM book_queue WHERE seq = \
             (SELECT seq FROM book_queue WHERE book_id = $1 ORDER BY seq LIMIT 1) \
             RETURNING user_id",
        )
        .bind(book_id)
        .fetch_optional(&mut tx)
        .await?;

        let book = fetch_book(&mut tx, book_id).await?;
        tx.commit().await?;

        Ok(Checkin {
            loan,
            book,
            next_in_line,
        })
    }

    async fn loans_of(&self, user_id: i64) -> Result<Vec<LoanView>> {
        let rows = sqlx::query_as::<_, LoanViewRow>(
            "SELECT l.id, l.user_id, l.book_id, l.borrow_date, l.return_date, \
             l.actual_return_date, l.status, b.title, b.author, b.isbn, b.image_url \
             FROM loans l LEFT JOIN books b ON b.id = l.book_id \
             WHERE l.user_id = $1 ORDER BY l.borrow_date DESC, l.id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut loans = Vec::with_capacity(rows.len());
        for row in rows {
            let book = row.title.map(|title| BookSummary {
                id: row.book_id,
                title,
                author: row.author.unwrap_or_default(),
                isbn: row.isbn.unwrap_or_default(),
                image_url: row.image_url,
            });
            let loan = Loan::try_from(LoanRow {
                id: row.id,
                user_id: row.user_id,
                book_id: row.book_id,
                borrow_date: row.borrow_date,
                return_date: row.return_date,
                actual_return_date: row.actual_return_date,
                status: row.status,
            })?;

            loans.push(LoanView { loan, book });
        }
        Ok(loans)
    }

    async fn overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>> {
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM loans \
             WHERE status = 'Active' AND return_date < $1 ORDER BY return_date"
        );
        let rows = sqlx::query_as::<_, LoanRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| Loan::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn enqueue(
        &self,
        book_id: i64,
        user_id: i64,
        joined_at: DateTime<Utc>,
    ) -> Result<Enqueued> {
        let mut tx = self.pool.begin().await?;

        let available: i32 =
            sqlx::query_scalar("SELECT available_quantity FROM books WHERE id = $1 FOR UPDATE")
                .bind(book_id)
                .fetch_optional(&mut tx)
                .await?
                .ok_or(StoreError::NotFound)?;
        if available > 0 {
            return Err(StoreError::Conflict(Conflict::CopiesAvailable));
        }

        let added = sqlx::query(
            "INSERT INTO book_queue (book_id, user_id, joined_at) VALUES ($1, $2, $3) \
             ON CONFLICT (book_id, user_id) DO NOTHING",
        )
        .bind(book_id)
        .bind(user_id)
        .bind(joined_at)
        .execute(&mut tx)
        .await
        .map_err(|e| match is_foreign_key_violation(&e) {
            true => StoreError::NotFound,
            false => e.into(),
        })?
        .rows_affected()
            > 0;

        let position: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM book_queue WHERE book_id = $1 AND seq <= \
             (SELECT seq FROM book_queue WHERE book_id = $1 AND user_id = $2)",
        )
        .bind(book_id)
        .bind(user_id)
        .fetch_one(&mut tx)
        .await?;

        let queue_length: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM book_queue WHERE book_id = $1")
                .bind(book_id)
                .fetch_one(&mut tx)
                .await?;

        tx.commit().await?;

        Ok(Enqueued {
            book_id,
            position: position as u32,
            queue_length: queue_length as u32,
            added,
        })
    }

    async fn dequeue(&self, book_id: i64, user_id: i64) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM book_queue WHERE book_id = $1 AND user_id = $2")
            .bind(book_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed == 0 && !book_exists(&self.pool, book_id).await? {
            return Err(StoreError::NotFound);
        }
        Ok(removed > 0)
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let sql = format!(
            "INSERT INTO notifications (user_id, message, kind, book_id, created_by) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(notification.user_id)
            .bind(notification.message)
            .bind(notification.kind.as_str())
            .bind(notification.book_id)
            .bind(notification.created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match is_foreign_key_violation(&e) {
                true => StoreError::NotFound,
                false => e.into(),
            })?;

        Ok(row.try_into()?)
    }

    async fn notifications_of(&self, user_id: i64) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| Notification::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn find_notification(&self, id: i64) -> Result<Notification> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1");
        let row = sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_into()?)
    }

    async fn mark_read(&self, id: i64) -> Result<Notification> {
        let sql = format!(
            "UPDATE notifications SET read = TRUE WHERE id = $1 RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_into()?)
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let changed =
            sqlx::query("UPDATE notifications SET read = TRUE WHERE user_id = $1 AND NOT read")
                .bind(user_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(changed)
    }

    async fn insert_activity(&self, activity: NewActivity) -> Result<Activity> {
        let row = sqlx::query_as::<_, ActivityRow>(
            "INSERT INTO activities (action, actor, details) VALUES ($1, $2, $3) \
             RETURNING id, action, actor, details, created_at",
        )
        .bind(activity.action)
        .bind(activity.actor)
        .bind(activity.details)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn recent_activities(&self, limit: u32) -> Result<Vec<Activity>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT id, action, actor, details, created_at FROM activities \
             ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Activity::from).collect())
    }

    async fn insert_feedback(&self, feedback: NewFeedback) -> Result<Feedback> {
        let row = sqlx::query_as::<_, FeedbackRow>(
            "INSERT INTO feedback (name, email, message) VALUES ($1, $2, $3) \
             RETURNING id, name, email, message, created_at",
        )
        .bind(feedback.name)
        .bind(feedback.email)
        .bind(feedback.message)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn feedback(&self) -> Result<Vec<Feedback>> {
        let rows = sqlx::query_as::<_, FeedbackRow>(
            "SELECT id, name, email, message, created_at FROM feedback \
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Feedback::from).collect())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<AdminStats> {
        let stats = sqlx::query_as::<_, AdminStats>(
            "SELECT \
             (SELECT COUNT(*) FROM users WHERE role = 'student') AS students, \
             (SELECT COUNT(*) FROM users WHERE role = 'admin') AS admins, \
             (SELECT COUNT(*) FROM books) AS titles, \
             (SELECT COALESCE(SUM(total_quantity), 0)::BIGINT FROM books) AS total_copies, \
             (SELECT COALESCE(SUM(available_quantity), 0)::BIGINT FROM books) AS available_copies, \
             (SELECT COUNT(*) FROM loans WHERE status = 'Active') AS active_loans, \
             (SELECT COUNT(*) FROM loans WHERE status = 'Active' AND return_date < $1) \
             AS overdue_loans, \
             (SELECT COUNT(*) FROM book_queue) AS waitlist_entries, \
             (SELECT COUNT(*) FROM feedback) AS feedback_entries",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}

#[cfg(test)]
mod test {
    use super::PgStore;
    use crate::models::{BookFilter, NewBook, NewUser, Role};
    use crate::store::{Conflict, Store, StoreError};
    use chrono::{Duration, Utc};
    use std::env;

    // runs only against a live database: DATABASE_URL=postgres://... cargo test -- --ignored
    #[actix_web::test]
    #[ignore]
    async fn test_checkout_race() {
        let db_url = env::var("DATABASE_URL").unwrap();
        let store = PgStore::new(&db_url).await.unwrap();
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let book = store
            .insert_book(NewBook {
                title: format!("race {stamp}"),
                author: "tester".to_string(),
                isbn: "0000000000".to_string(),
                category: "0".to_string(),
                description: String::new(),
                image_url: None,
                total_quantity: 1,
            })
            .await
            .unwrap();
        let book_id = book.id;

        let mut handles = vec![];
        for i in 0..8 {
            let store = store.clone();
            let user = store
                .insert_user(NewUser {
                    name: format!("racer {i}"),
                    email: format!("racer{i}-{stamp}@example.com"),
                    password_hash: "x".to_string(),
                    role: Role::Student,
                    department: None,
                })
                .await
                .unwrap();
            handles.push(actix_web::rt::spawn(async move {
                let now = Utc::now();
                store
                    .checkout(user.id, book_id, now, now + Duration::days(15))
                    .await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(StoreError::Conflict(Conflict::NoCopyAvailable)) => (),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(store.find_book(book.id).await.unwrap().available_quantity, 0);

        let chunk = store
            .query_books(
                &BookFilter {
                    text: Some(format!("race {stamp}")),
                    category: None,
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(chunk.total_count, 1);
    }

    #[actix_web::test]
    #[ignore]
    async fn test_concurrent_borrow_and_return() {
        let db_url = env::var("DATABASE_URL").unwrap();
        let store = PgStore::new(&db_url).await.unwrap();
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let book = store
            .insert_book(NewBook {
                title: format!("turnover {stamp}"),
                author: "tester".to_string(),
                isbn: "0000000000".to_string(),
                category: "0".to_string(),
                description: String::new(),
                image_url: None,
                total_quantity: 2,
            })
            .await
            .unwrap();
        let user = store
            .insert_user(NewUser {
                name: "turnover".to_string(),
                email: format!("turnover-{stamp}@example.com"),
                password_hash: "x".to_string(),
                role: Role::Student,
                department: None,
            })
            .await
            .unwrap();
        let (book_id, user_id) = (book.id, user.id);

        for _ in 0..20 {
            let now = Utc::now();
            // keep one loan open so both sides have work to do
            match store
                .checkout(user_id, book_id, now, now + Duration::days(15))
                .await
            {
                Ok(_) | Err(StoreError::Conflict(Conflict::AlreadyBorrowed)) => (),
                Err(e) => panic!("unexpected error: {e}"),
            }

            let returner = store.clone();
            let borrower = store.clone();
            let returning =
                actix_web::rt::spawn(async move { returner.checkin(user_id, book_id, now).await });
            let borrowing = actix_web::rt::spawn(async move {
                borrower
                    .checkout(user_id, book_id, now, now + Duration::days(15))
                    .await
            });

            match returning.await.unwrap() {
                Ok(_) | Err(StoreError::Conflict(Conflict::NotBorrowed)) => (),
                Err(e) => panic!("unexpected error: {e}"),
            }
            match borrowing.await.unwrap() {
                Ok(_) | Err(StoreError::Conflict(Conflict::AlreadyBorrowed)) => (),
                Err(e) => panic!("unexpected error: {e}"),
            }

            let book = store.find_book(book_id).await.unwrap();
            assert!(book.available_quantity >= 1 && book.available_quantity <= 2);
        }
    }
}

use super::{Conflict, Result, Store, StoreError};
use crate::models::{
    Activity, AdminStats, Book, BookChunk, BookFilter, BookPatch, CategoryCount, Checkin,
    Checkout, Enqueued, Feedback, Loan, LoanStatus, LoanView, NewActivity, NewBook, NewFeedback,
    NewNotification, NewUser, Notification, Role, Session, User, UserPatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

// Store kept in process memory. A single lock guards every table, so each
// operation is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore(Mutex<Tables>);

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: Vec<User>,
    sessions: Vec<Session>,
    books: Vec<Book>,
    loans: Vec<Loan>,
    notifications: Vec<Notification>,
    activities: Vec<Activity>,
    feedback: Vec<Feedback>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // drops the account row only, leaving its loans behind
    #[cfg(test)]
    pub(crate) async fn remove_user(&self, id: i64) {
        self.0.lock().await.users.retain(|item| item.id != id);
    }
}

fn find_ref<T, P>(v: &[T], predicate: P) -> Result<&T>
where
    P: FnMut(&&T) -> bool,
{
    v.iter().find(predicate).ok_or(StoreError::NotFound)
}

fn find_mut<T, P>(v: &mut [T], predicate: P) -> Result<&mut T>
where
    P: FnMut(&&mut T) -> bool,
{
    v.iter_mut().find(predicate).ok_or(StoreError::NotFound)
}

fn matches_filter(book: &Book, filter: &BookFilter) -> bool {
    let text = filter.text.as_ref().map(|text| text.to_lowercase());
    let text_ok = text.map_or(true, |text| {
        [&book.title, &book.author, &book.isbn]
            .iter()
            .any(|field| field.to_lowercase().contains(&text))
    });
    let category_ok = filter
        .category
        .as_ref()
        .map_or(true, |category| book.category.starts_with(category.as_str()));

    text_ok && category_ok
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.0.lock().await;

        if tables.users.iter().any(|item| item.email == user.email) {
            return Err(StoreError::Conflict(Conflict::EmailTaken));
        }

        let user = User {
            id: tables.next_id(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            department: user.department,
            created_at: Utc::now(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> Result<User> {
        let tables = self.0.lock().await;
        Ok(find_ref(&tables.users, |item| item.id == id)?.clone())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User> {
        let tables = self.0.lock().await;
        Ok(find_ref(&tables.users, |item| item.email == email)?.clone())
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<User> {
        let mut tables = self.0.lock().await;

        if let Some(email) = &patch.email {
            if tables
                .users
                .iter()
                .any(|item| item.id != id && &item.email == email)
            {
                return Err(StoreError::Conflict(Conflict::EmailTaken));
            }
        }

        let user = find_mut(&mut tables.users, |item| item.id == id)?;
        let UserPatch {
            name,
            email,
            password_hash,
            department,
        } = patch;
        if let Some(val) = name {
            user.name = val;
        }
        if let Some(val) = email {
            user.email = val;
        }
        if let Some(val) = password_hash {
            user.password_hash = val;
        }
        if let Some(val) = department {
            user.department = Some(val).filter(|text| !text.is_empty());
        }

        Ok(user.clone())
    }

    async fn insert_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.0.lock().await;
        find_ref(&tables.users, |item| item.id == user_id)?;

        tables.sessions.push(Session {
            token: token.to_string(),
            user_id,
            expires_at,
        });
        Ok(())
    }

    async fn find_session_user(&self, token: &str, now: DateTime<Utc>) -> Result<User> {
        let tables = self.0.lock().await;
        let session = find_ref(&tables.sessions, |item| {
            item.token == token && item.expires_at > now
        })?;

        Ok(find_ref(&tables.users, |item| item.id == session.user_id)?.clone())
    }

    async fn delete_session(&self, token: &str) -> Result<bool> {
        let mut tables = self.0.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|item| item.token != token);
        Ok(tables.sessions.len() != before)
    }

    async fn insert_book(&self, book: NewBook) -> Result<Book> {
        let mut tables = self.0.lock().await;

        let book = Book {
            id: tables.next_id(),
            title: book.title,
            author: book.author,
            isbn: book.isbn,
            category: book.category,
            description: book.description,
            image_url: book.image_url,
            total_quantity: book.total_quantity,
            available_quantity: book.total_quantity,
            queue: vec![],
            created_at: Utc::now(),
        };
        tables.books.push(book.clone());
        Ok(book)
    }

    async fn find_book(&self, id: i64) -> Result<Book> {
        let tables = self.0.lock().await;
        Ok(find_ref(&tables.books, |item| item.id == id)?.clone())
    }

    async fn query_books(
        &self,
        filter: &BookFilter,
        page_size: u32,
        page: u32,
    ) -> Result<BookChunk> {
        let tables = self.0.lock().await;

        let mut filtered: Vec<_> = tables
            .books
            .iter()
            .filter(|book| matches_filter(book, filter))
            .collect();
        filtered.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));

        let total_count = filtered.len() as u32;
        let offset = (page_size as u64).saturating_mul(page as u64);
        let items = filtered
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok(BookChunk { items, total_count })
    }

    async fn update_book(&self, id: i64, patch: BookPatch) -> Result<Book> {
        let mut tables = self.0.lock().await;
        let book = find_mut(&mut tables.books, |item| item.id == id)?;

        let mut updated = book.clone();
        if !patch.apply(&mut updated) {
            return Err(StoreError::Conflict(Conflict::CopiesOnLoan));
        }
        *book = updated.clone();
        Ok(updated)
    }

    async fn delete_book(&self, id: i64) -> Result<Book> {
        let mut tables = self.0.lock().await;
        let book = find_ref(&tables.books, |item| item.id == id)?;

        if book.on_loan() > 0 {
            return Err(StoreError::Conflict(Conflict::CopiesOnLoan));
        }

        let index = tables
            .books
            .iter()
            .position(|item| item.id == id)
            .ok_or(StoreError::NotFound)?;
        Ok(tables.books.remove(index))
    }

    async fn category_counts(&self) -> Result<Vec<CategoryCount>> {
        let tables = self.0.lock().await;

        let mut counts: Vec<CategoryCount> = vec![];
        for book in &tables.books {
            match counts.iter_mut().find(|item| item.category == book.category) {
                Some(item) => {
                    item.titles += 1;
                    item.copies += book.total_quantity as i64;
                }
                None => counts.push(CategoryCount {
                    category: book.category.clone(),
                    titles: 1,
                    copies: book.total_quantity as i64,
                }),
            }
        }
        Ok(counts)
    }

    async fn checkout(
        &self,
        user_id: i64,
        book_id: i64,
        borrowed_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Result<Checkout> {
        let mut tables = self.0.lock().await;
        find_ref(&tables.users, |item| item.id == user_id)?;

        let book = find_ref(&tables.books, |item| item.id == book_id)?;
        if book.available_quantity <= 0 {
            return Err(StoreError::Conflict(Conflict::NoCopyAvailable));
        }
        if tables.loans.iter().any(|item| {
            item.user_id == user_id && item.book_id == book_id && item.status == LoanStatus::Active
        }) {
            return Err(StoreError::Conflict(Conflict::AlreadyBorrowed));
        }

        let loan = Loan {
            id: tables.next_id(),
            user_id,
            book_id,
            borrow_date: borrowed_at,
            return_date: due_at,
            actual_return_date: None,
            status: LoanStatus::Active,
        };
        tables.loans.push(loan.clone());

        let book = find_mut(&mut tables.books, |item| item.id == book_id)?;
        book.available_quantity -= 1;
        book.queue.retain(|id| *id != user_id);

        Ok(Checkout {
            loan,
            book: book.clone(),
        })
    }

    async fn checkin(
        &self,
        user_id: i64,
        book_id: i64,
        returned_at: DateTime<Utc>,
    ) -> Result<Checkin> {
        let mut tables = self.0.lock().await;
        find_ref(&tables.books, |item| item.id == book_id)?;

        let loan = find_mut(&mut tables.loans, |item| {
            item.user_id == user_id && item.book_id == book_id && item.status == LoanStatus::Active
        })
        .map_err(|_| StoreError::Conflict(Conflict::NotBorrowed))?;
        loan.status = LoanStatus::Returned;
        loan.actual_return_date = Some(returned_at);
        let loan = loan.clone();

        let book = find_mut(&mut tables.books, |item| item.id == book_id)?;
        book.available_quantity += 1;
        let next_in_line = match book.queue.is_empty() {
            true => None,
            false => Some(book.queue.remove(0)),
        };

        Ok(Checkin {
            loan,
            book: book.clone(),
            next_in_line,
        })
    }

    async fn loans_of(&self, user_id: i64) -> Result<Vec<LoanView>> {
        let tables = self.0.lock().await;

        let mut loans: Vec<_> = tables
            .loans
            .iter()
            .filter(|item| item.user_id == user_id)
            .map(|loan| LoanView {
                loan: loan.clone(),
                book: tables
                    .books
                    .iter()
                    .find(|book| book.id == loan.book_id)
                    .cloned()
                    .map(Into::into),
            })
            .collect();
        loans.sort_by(|a, b| b.loan.borrow_date.cmp(&a.loan.borrow_date));
        Ok(loans)
    }

    async fn overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>> {
        let tables = self.0.lock().await;

        Ok(tables
            .loans
            .iter()
            .filter(|item| item.is_overdue(now))
            .cloned()
            .collect())
    }

    async fn enqueue(
        &self,
        book_id: i64,
        user_id: i64,
        _joined_at: DateTime<Utc>,
    ) -> Result<Enqueued> {
        let mut tables = self.0.lock().await;
        find_ref(&tables.users, |item| item.id == user_id)?;

        let book = find_mut(&mut tables.books, |item| item.id == book_id)?;
        if book.available_quantity > 0 {
            return Err(StoreError::Conflict(Conflict::CopiesAvailable));
        }

        let added = !book.queue.contains(&user_id);
        if added {
            book.queue.push(user_id);
        }
        let position = book
            .queue
            .iter()
            .position(|id| *id == user_id)
            .map_or(0, |index| index as u32 + 1);

        Ok(Enqueued {
            book_id,
            position,
            queue_length: book.queue.len() as u32,
            added,
        })
    }

    async fn dequeue(&self, book_id: i64, user_id: i64) -> Result<bool> {
        let mut tables = self.0.lock().await;
        let book = find_mut(&mut tables.books, |item| item.id == book_id)?;

        let before = book.queue.len();
        book.queue.retain(|id| *id != user_id);
        Ok(book.queue.len() != before)
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let mut tables = self.0.lock().await;
        find_ref(&tables.users, |item| item.id == notification.user_id)?;

        let notification = Notification {
            id: tables.next_id(),
            user_id: notification.user_id,
            message: notification.message,
            kind: notification.kind,
            read: false,
            book_id: notification.book_id,
            created_by: notification.created_by,
            created_at: Utc::now(),
        };
        tables.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn notifications_of(&self, user_id: i64) -> Result<Vec<Notification>> {
        let tables = self.0.lock().await;

        Ok(tables
            .notifications
            .iter()
            .rev()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_notification(&self, id: i64) -> Result<Notification> {
        let tables = self.0.lock().await;
        Ok(find_ref(&tables.notifications, |item| item.id == id)?.clone())
    }

    async fn mark_read(&self, id: i64) -> Result<Notification> {
        let mut tables = self.0.lock().await;
        let notification = find_mut(&mut tables.notifications, |item| item.id == id)?;
        notification.read = true;
        Ok(notification.clone())
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let mut tables = self.0.lock().await;

        let mut changed = 0;
        for item in tables
            .notifications
            .iter_mut()
            .filter(|item| item.user_id == user_id && !item.read)
        {
            item.read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert_activity(&self, activity: NewActivity) -> Result<Activity> {
        let mut tables = self.0.lock().await;

        let activity = Activity {
            id: tables.next_id(),
            action: activity.action,
            actor: activity.actor,
            details: activity.details,
            created_at: Utc::now(),
        };
        tables.activities.push(activity.clone());
        Ok(activity)
    }

    async fn recent_activities(&self, limit: u32) -> Result<Vec<Activity>> {
        let tables = self.0.lock().await;

        Ok(tables
            .activities
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_feedback(&self, feedback: NewFeedback) -> Result<Feedback> {
        let mut tables = self.0.lock().await;

        let feedback = Feedback {
            id: tables.next_id(),
            name: feedback.name,
            email: feedback.email,
            message: feedback.message,
            created_at: Utc::now(),
        };
        tables.feedback.push(feedback.clone());
        Ok(feedback)
    }

    async fn feedback(&self) -> Result<Vec<Feedback>> {
        let tables = self.0.lock().await;
        Ok(tables.feedback.iter().rev().cloned().collect())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<AdminStats> {
        let tables = self.0.lock().await;

        let count_role = |role: Role| tables.users.iter().filter(|u| u.role == role).count() as i64;

        Ok(AdminStats {
            students: count_role(Role::Student),
            admins: count_role(Role::Admin),
            titles: tables.books.len() as i64,
            total_copies: tables.books.iter().map(|b| b.total_quantity as i64).sum(),
            available_copies: tables.books.iter().map(|b| b.available_quantity as i64).sum(),
            active_loans: tables
                .loans
                .iter()
                .filter(|l| l.status == LoanStatus::Active)
                .count() as i64,
            overdue_loans: tables.loans.iter().filter(|l| l.is_overdue(now)).count() as i64,
            waitlist_entries: tables.books.iter().map(|b| b.queue.len() as i64).sum(),
            feedback_entries: tables.feedback.len() as i64,
        })
    }
}

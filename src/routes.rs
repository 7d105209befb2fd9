use crate::{
    error::{AppError, AppResult},
    extractor::{AdminUser, AuthUser},
    library::Library,
    models::{
        BookData, BookIdData, BookPatch, BookQuery, FeedbackData, LoginData, NotificationData,
        ProfileData, RegisterData, UnreadCount,
    },
};
use actix_web::{
    delete, get, post, put,
    web::{self, Data, Json, Path, Query},
    HttpResponse,
};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_ACTIVITY_LIMIT: u32 = 50;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .service(user_create)
    .service(user_login)
    .service(user_logout)
    .service(profile_get)
    .service(profile_update)
    .service(borrow)
    .service(return_book)
    .service(my_books)
    .service(book_query)
    // before `/api/books/{id}`
    .service(udc_counts)
    .service(book_get)
    .service(book_create)
    .service(book_update)
    .service(book_delete)
    .service(reserve_create)
    .service(reserve_delete)
    .service(admin_stats)
    .service(admin_activities)
    .service(admin_reminders)
    .service(notification_query)
    .service(notification_unread_count)
    .service(notification_create)
    .service(notification_read_all)
    .service(notification_read)
    .service(feedback_create)
    .service(feedback_query);
}

#[post("/api/users")]
async fn user_create(data: Json<RegisterData>, library: Data<Library>) -> AppResult<HttpResponse> {
    let result = library.register(data.into_inner()).await?;
    Ok(HttpResponse::Created().json(result))
}

#[post("/api/users/login")]
async fn user_login(data: Json<LoginData>, library: Data<Library>) -> AppResult<HttpResponse> {
    let result = library.login(data.into_inner()).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[post("/api/users/logout")]
async fn user_logout(auth: AuthUser, library: Data<Library>) -> AppResult<HttpResponse> {
    library.logout(&auth.token).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "logged out" })))
}

#[get("/api/users/profile")]
async fn profile_get(auth: AuthUser, library: Data<Library>) -> AppResult<HttpResponse> {
    let profile = library.profile(&auth.user).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[put("/api/users/profile")]
async fn profile_update(
    auth: AuthUser,
    data: Json<ProfileData>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let user = library.update_profile(&auth.user, data.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[post("/api/users/borrow")]
async fn borrow(
    auth: AuthUser,
    data: Json<BookIdData>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let loan = library.borrow(&auth.user, data.book_id).await?;
    Ok(HttpResponse::Ok().json(loan))
}

#[post("/api/users/return")]
async fn return_book(
    auth: AuthUser,
    data: Json<BookIdData>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let loan = library.return_book(&auth.user, data.book_id).await?;
    Ok(HttpResponse::Ok().json(loan))
}

#[get("/api/users/mybooks")]
async fn my_books(auth: AuthUser, library: Data<Library>) -> AppResult<HttpResponse> {
    let loans = library.my_books(&auth.user).await?;
    Ok(HttpResponse::Ok().json(loans))
}

#[get("/api/books")]
async fn book_query(query: Query<BookQuery>, library: Data<Library>) -> AppResult<HttpResponse> {
    let chunk = library.books(query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(chunk))
}

#[get("/api/books/udc-counts")]
async fn udc_counts(library: Data<Library>) -> AppResult<HttpResponse> {
    let counts = library.udc_counts().await?;
    Ok(HttpResponse::Ok().json(counts))
}

#[get("/api/books/{id}")]
async fn book_get(id: Path<i64>, library: Data<Library>) -> AppResult<HttpResponse> {
    let book = library.book(*id).await?;
    Ok(HttpResponse::Ok().json(book))
}

#[post("/api/books")]
async fn book_create(
    AdminUser(admin): AdminUser,
    data: Json<BookData>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let book = library.create_book(&admin, data.into_inner()).await?;
    Ok(HttpResponse::Created().json(book))
}

#[put("/api/books/{id}")]
async fn book_update(
    AdminUser(admin): AdminUser,
    id: Path<i64>,
    data: Json<BookPatch>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let book = library.update_book(&admin, *id, data.into_inner()).await?;
    Ok(HttpResponse::Ok().json(book))
}

#[delete("/api/books/{id}")]
async fn book_delete(
    AdminUser(admin): AdminUser,
    id: Path<i64>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let book = library.delete_book(&admin, *id).await?;
    Ok(HttpResponse::Ok().json(book))
}

#[post("/api/books/{id}/reserve")]
async fn reserve_create(
    auth: AuthUser,
    id: Path<i64>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let enqueued = library.reserve(&auth.user, *id).await?;
    Ok(HttpResponse::Ok().json(enqueued))
}

#[delete("/api/books/{id}/reserve")]
async fn reserve_delete(
    auth: AuthUser,
    id: Path<i64>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let removed = library.leave_waitlist(&auth.user, *id).await?;
    Ok(HttpResponse::Ok().json(json!({ "removed": removed })))
}

#[get("/api/admin/stats")]
async fn admin_stats(_: AdminUser, library: Data<Library>) -> AppResult<HttpResponse> {
    let stats = library.stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    limit: Option<u32>,
}

#[get("/api/admin/activities")]
async fn admin_activities(
    _: AdminUser,
    query: Query<ActivityQuery>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let activities = library
        .activities(query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT))
        .await?;
    Ok(HttpResponse::Ok().json(activities))
}

#[post("/api/admin/reminders")]
async fn admin_reminders(
    AdminUser(admin): AdminUser,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let sent = library.send_reminders(&admin).await?;
    Ok(HttpResponse::Ok().json(json!({ "sent": sent })))
}

#[get("/api/notifications")]
async fn notification_query(auth: AuthUser, library: Data<Library>) -> AppResult<HttpResponse> {
    let notifications = library.notifications(&auth.user).await?;
    Ok(HttpResponse::Ok().json(notifications))
}

#[get("/api/notifications/unread-count")]
async fn notification_unread_count(
    auth: AuthUser,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let unread = library.unread_count(&auth.user).await?;
    Ok(HttpResponse::Ok().json(UnreadCount { unread }))
}

#[post("/api/notifications")]
async fn notification_create(
    AdminUser(admin): AdminUser,
    data: Json<NotificationData>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let notification = library.notify(&admin, data.into_inner()).await?;
    Ok(HttpResponse::Created().json(notification))
}

#[put("/api/notifications/read-all")]
async fn notification_read_all(auth: AuthUser, library: Data<Library>) -> AppResult<HttpResponse> {
    let updated = library.mark_all_read(&auth.user).await?;
    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}

#[put("/api/notifications/{id}/read")]
async fn notification_read(
    auth: AuthUser,
    id: Path<i64>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let notification = library.mark_read(&auth.user, *id).await?;
    Ok(HttpResponse::Ok().json(notification))
}

#[post("/api/feedback")]
async fn feedback_create(
    data: Json<FeedbackData>,
    library: Data<Library>,
) -> AppResult<HttpResponse> {
    let feedback = library.submit_feedback(data.into_inner()).await?;
    Ok(HttpResponse::Created().json(feedback))
}

#[get("/api/feedback")]
async fn feedback_query(_: AdminUser, library: Data<Library>) -> AppResult<HttpResponse> {
    let feedback = library.feedback().await?;
    Ok(HttpResponse::Ok().json(feedback))
}

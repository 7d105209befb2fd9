use crate::store::{Conflict, StoreError};
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("admin privileges required")]
    Forbidden,
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

impl From<StoreError> for AppError {
    fn from(val: StoreError) -> Self {
        match val {
            StoreError::NotFound => AppError::NotFound("not found".to_string()),
            StoreError::Conflict(Conflict::EmailTaken) => {
                AppError::Conflict(Conflict::EmailTaken.to_string())
            }
            StoreError::Conflict(conflict) => AppError::Rejected(conflict.to_string()),
            StoreError::Internal(e) => AppError::Internal(e),
        }
    }
}

// maps a store miss to a 404 naming the missing thing, everything else as usual
pub fn missing(what: &'static str) -> impl FnOnce(StoreError) -> AppError {
    move |e| match e {
        StoreError::NotFound => AppError::NotFound(format!("{what} not found")),
        e => e.into(),
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Rejected(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let AppError::Internal(e) = self {
            tracing::error!(error.cause_chain = ?e, "unexpected error happened");
        }

        HttpResponse::build(self.status_code()).json(json!({ "message": self.to_string() }))
    }
}

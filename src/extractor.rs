use crate::{
    error::{AppError, AppResult},
    library::Library,
    models::User,
};
use actix_web::{dev::Payload, http::header, web::Data, FromRequest, HttpRequest};
use anyhow::anyhow;
use std::{future::Future, pin::Pin};

// A request carrying a valid `Authorization: Bearer <token>` header.
#[derive(Debug)]
pub struct AuthUser {
    pub token: String,
    pub user: User,
}

// An authenticated user holding the admin role.
#[derive(Debug)]
pub struct AdminUser(pub User);

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

async fn authenticate(library: Option<Data<Library>>, token: Option<String>) -> AppResult<AuthUser> {
    let library = library.ok_or_else(|| anyhow!("library is not registered as app data"))?;
    let token = token.ok_or_else(|| {
        AppError::Unauthenticated("missing bearer token".to_string())
    })?;

    let user = library.authenticate(&token).await?;
    Ok(AuthUser { token, user })
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let library = req.app_data::<Data<Library>>().cloned();
        let token = bearer_token(req);
        Box::pin(authenticate(library, token))
    }
}

impl FromRequest for AdminUser {
    type Error = AppError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let library = req.app_data::<Data<Library>>().cloned();
        let token = bearer_token(req);
        Box::pin(async move {
            let auth = authenticate(library, token).await?;
            if !auth.user.is_admin() {
                tracing::debug!(user_id = auth.user.id, "admin route refused");
                return Err(AppError::Forbidden);
            }
            Ok(AdminUser(auth.user))
        })
    }
}

#[cfg(test)]
mod test {
    use super::bearer_token;
    use actix_web::{http::header, test::TestRequest};

    #[test]
    fn test_bearer_token() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer abc+/="))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc+/="));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic abc"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default().to_http_request();
        assert_eq!(bearer_token(&req), None);
    }
}

use crate::{
    config::AdminSeed,
    error::{missing, AppError, AppResult},
    library::{require_text, Library},
    models::{
        LoginData, LoginResult, NewUser, Profile, ProfileData, RegisterData, Role, User,
        UserPatch,
    },
    store::StoreError,
};
use actix_web::web;
use anyhow::{anyhow, Context};
use base64::Engine;
use chrono::{Duration, Utc};
use rand::Rng;

const MIN_PASSWORD_LEN: usize = 6;

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::validation("email address is invalid")),
    }
}

fn check_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must have at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

impl Library {
    async fn hash_password(&self, password: String) -> AppResult<String> {
        let cost = self.config.bcrypt_cost;
        let hash = web::block(move || bcrypt::hash(password, cost))
            .await
            .map_err(|_| anyhow!("password hashing was cancelled"))?
            .context("failed to hash password")?;
        Ok(hash)
    }

    async fn verify_password(&self, password: String, hash: String) -> AppResult<bool> {
        let valid = web::block(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|_| anyhow!("password verification was cancelled"))?
            .context("failed to verify password")?;
        Ok(valid)
    }

    async fn open_session(&self, user: User) -> AppResult<LoginResult> {
        let mut buf = [0u8; 32];
        rand::rngs::OsRng.fill(&mut buf);
        let token = base64::engine::general_purpose::STANDARD.encode(buf);

        let expires_at = Utc::now() + Duration::hours(self.config.session_ttl_hours);
        self.store
            .insert_session(&token, user.id, expires_at)
            .await
            .map_err(missing("user"))?;

        Ok(LoginResult {
            token,
            expires_at,
            user,
        })
    }

    #[tracing::instrument(skip(self, data), fields(email = %data.email))]
    pub async fn register(&self, data: RegisterData) -> AppResult<LoginResult> {
        let name = require_text("name", &data.name)?;
        let email = normalize_email(&data.email)?;
        check_password(&data.password)?;

        let user = NewUser {
            name,
            email,
            password_hash: self.hash_password(data.password).await?,
            role: Role::Student,
            department: data
                .department
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
        };
        let user = self.store.insert_user(user).await?;
        tracing::info!(user_id = user.id, "registered user");

        self.open_session(user).await
    }

    #[tracing::instrument(skip(self, data), fields(email = %data.email))]
    pub async fn login(&self, data: LoginData) -> AppResult<LoginResult> {
        let rejected = || AppError::Unauthenticated("invalid email or password".to_string());

        let email = normalize_email(&data.email).map_err(|_| rejected())?;
        let user = match self.store.find_user_by_email(&email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(rejected()),
            Err(e) => return Err(e.into()),
        };

        if !self
            .verify_password(data.password, user.password_hash.clone())
            .await?
        {
            tracing::debug!(user_id = user.id, "wrong password");
            return Err(rejected());
        }

        self.open_session(user).await
    }

    pub async fn logout(&self, token: &str) -> AppResult<()> {
        self.store.delete_session(token).await?;
        Ok(())
    }

    // Resolves a bearer token to its user.
    pub async fn authenticate(&self, token: &str) -> AppResult<User> {
        match self.store.find_session_user(token, Utc::now()).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(AppError::Unauthenticated(
                "session is invalid or expired".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn profile(&self, user: &User) -> AppResult<Profile> {
        let user = self.store.find_user(user.id).await.map_err(missing("user"))?;
        let borrowed_books = self
            .store
            .loans_of(user.id)
            .await?
            .into_iter()
            .map(|view| view.loan)
            .collect();

        Ok(Profile {
            user,
            borrowed_books,
        })
    }

    #[tracing::instrument(skip(self, user, data), fields(user_id = user.id))]
    pub async fn update_profile(&self, user: &User, data: ProfileData) -> AppResult<User> {
        let name = data
            .name
            .as_deref()
            .map(|name| require_text("name", name))
            .transpose()?;
        let email = data.email.as_deref().map(normalize_email).transpose()?;
        let password_hash = match data.password {
            Some(password) => {
                check_password(&password)?;
                Some(self.hash_password(password).await?)
            }
            None => None,
        };

        let patch = UserPatch {
            name,
            email,
            password_hash,
            department: data.department.map(|text| text.trim().to_string()),
        };
        let user = self
            .store
            .update_user(user.id, patch)
            .await
            .map_err(missing("user"))?;
        tracing::info!("updated profile");

        Ok(user)
    }

    #[tracing::instrument(skip(self, seed), fields(email = %seed.email))]
    pub async fn ensure_admin(&self, seed: &AdminSeed) -> AppResult<User> {
        let email = normalize_email(&seed.email)?;

        match self.store.find_user_by_email(&email).await {
            Ok(user) => {
                if !user.is_admin() {
                    tracing::warn!(user_id = user.id, "seed email belongs to a non-admin account");
                }
                return Ok(user);
            }
            Err(StoreError::NotFound) => (),
            Err(e) => return Err(e.into()),
        }

        check_password(&seed.password)?;
        let user = NewUser {
            name: require_text("name", &seed.name)?,
            email,
            password_hash: self.hash_password(seed.password.clone()).await?,
            role: Role::Admin,
            department: None,
        };
        let user = self.store.insert_user(user).await?;
        tracing::info!(user_id = user.id, "created admin account");

        Ok(user)
    }
}

#[cfg(test)]
mod test {
    use crate::error::AppError;
    use crate::library::testing;
    use crate::models::{LoginData, ProfileData, RegisterData, Role};

    #[actix_web::test]
    async fn test_register_login_logout() {
        let library = testing::library();
        let login = testing::student(&library, "Alice").await;
        assert_eq!(login.user.role, Role::Student);
        assert_eq!(login.user.email, "alice@college.edu");

        let user = library.authenticate(&login.token).await.unwrap();
        assert_eq!(user.id, login.user.id);

        let again = library
            .login(LoginData {
                email: " ALICE@college.edu ".to_string(),
                password: "secret-password".to_string(),
            })
            .await
            .unwrap();
        assert_ne!(again.token, login.token);

        library.logout(&login.token).await.unwrap();
        let err = library.authenticate(&login.token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
        assert!(library.authenticate(&again.token).await.is_ok());
    }

    #[actix_web::test]
    async fn test_login_rejects_bad_credentials() {
        let library = testing::library();
        testing::student(&library, "Alice").await;

        let err = library
            .login(LoginData {
                email: "alice@college.edu".to_string(),
                password: "wrong-password".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));

        let err = library
            .login(LoginData {
                email: "nobody@college.edu".to_string(),
                password: "secret-password".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }

    #[actix_web::test]
    async fn test_register_validation() {
        let library = testing::library();
        testing::student(&library, "Alice").await;

        let register = |email: &str, password: &str| RegisterData {
            name: "Bob".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            department: None,
        };

        let err = library
            .register(register("alice@college.edu", "secret-password"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = library
            .register(register("bob-at-college", "secret-password"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = library
            .register(register("bob@college.edu", "123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[actix_web::test]
    async fn test_update_profile() {
        let library = testing::library();
        let login = testing::student(&library, "Alice").await;

        let user = library
            .update_profile(
                &login.user,
                ProfileData {
                    name: Some("Alice Liddell".to_string()),
                    department: Some("Mathematics".to_string()),
                    password: Some("new-password".to_string()),
                    ..ProfileData::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(user.name, "Alice Liddell");
        assert_eq!(user.department.as_deref(), Some("Mathematics"));

        library
            .login(LoginData {
                email: "alice@college.edu".to_string(),
                password: "new-password".to_string(),
            })
            .await
            .unwrap();

        let profile = library.profile(&user).await.unwrap();
        assert!(profile.borrowed_books.is_empty());
    }

    #[actix_web::test]
    async fn test_ensure_admin_is_idempotent() {
        let library = testing::library();
        let first = testing::admin(&library).await;
        let second = testing::admin(&library).await;
        assert_eq!(first.id, second.id);
        assert_eq!(first.role, Role::Admin);
    }
}

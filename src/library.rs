use crate::{
    config::LibraryConfig,
    models::{NewActivity, User},
    store::Store,
};
use std::sync::Arc;

// Library service shared by all request handlers. Operations are split
// across `account`, `catalog`, `circulation`, `notice` and `admin`.
#[derive(Clone)]
pub struct Library {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) config: Arc<LibraryConfig>,
}

impl Library {
    pub fn new(store: Arc<dyn Store>, config: LibraryConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    // the audit trail never fails the mutation it describes
    pub(crate) async fn record_activity(&self, action: &str, actor: &User, details: String) {
        let activity = NewActivity {
            action: action.to_string(),
            actor: actor.name.clone(),
            details,
        };

        if let Err(e) = self.store.insert_activity(activity).await {
            tracing::warn!(action, error = %e, "failed to record activity");
        }
    }
}

pub(crate) fn require_text(field: &str, value: &str) -> crate::error::AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(crate::error::AppError::validation(format!(
            "{field} must not be empty"
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Library;
    use crate::{
        config::{AdminSeed, LibraryConfig},
        models::{Book, BookData, LoginResult, RegisterData, User},
        store::MemoryStore,
    };
    use std::sync::Arc;

    pub fn library() -> Library {
        let config = LibraryConfig {
            bcrypt_cost: 4,
            ..LibraryConfig::default()
        };
        Library::new(Arc::new(MemoryStore::new()), config)
    }

    pub async fn student(library: &Library, name: &str) -> LoginResult {
        library
            .register(RegisterData {
                name: name.to_string(),
                email: format!("{}@college.edu", name.to_lowercase()),
                password: "secret-password".to_string(),
                department: None,
            })
            .await
            .unwrap()
    }

    pub async fn admin(library: &Library) -> User {
        let seed = AdminSeed {
            name: "Librarian".to_string(),
            email: "librarian@college.edu".to_string(),
            password: "librarian-password".to_string(),
        };
        library.ensure_admin(&seed).await.unwrap()
    }

    pub async fn book(library: &Library, admin: &User, title: &str, copies: i32) -> Book {
        library
            .create_book(
                admin,
                BookData {
                    title: title.to_string(),
                    author: "Knuth".to_string(),
                    isbn: "9780201896831".to_string(),
                    category: "004.4".to_string(),
                    description: String::new(),
                    image_url: None,
                    total_quantity: copies,
                },
            )
            .await
            .unwrap()
    }
}

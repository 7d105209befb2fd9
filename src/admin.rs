use crate::{
    error::AppResult,
    library::Library,
    models::{Activity, AdminStats},
};
use chrono::Utc;

const MAX_ACTIVITIES: u32 = 200;

impl Library {
    pub async fn stats(&self) -> AppResult<AdminStats> {
        Ok(self.store.stats(Utc::now()).await?)
    }

    pub async fn activities(&self, limit: u32) -> AppResult<Vec<Activity>> {
        Ok(self
            .store
            .recent_activities(limit.clamp(1, MAX_ACTIVITIES))
            .await?)
    }
}

#[cfg(test)]
mod test {
    use crate::library::testing;
    use crate::models::{AdminStats, FeedbackData};

    #[actix_web::test]
    async fn test_stats() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        let alice = testing::student(&library, "Alice").await.user;
        let bob = testing::student(&library, "Bob").await.user;
        let taocp = testing::book(&library, &admin, "TAOCP", 1).await;
        testing::book(&library, &admin, "SICP", 3).await;

        library.borrow(&alice, taocp.id).await.unwrap();
        library.reserve(&bob, taocp.id).await.unwrap();
        library
            .submit_feedback(FeedbackData {
                name: "Bob".to_string(),
                email: "bob@college.edu".to_string(),
                message: "Open on Sundays".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            library.stats().await.unwrap(),
            AdminStats {
                students: 2,
                admins: 1,
                titles: 2,
                total_copies: 4,
                available_copies: 3,
                active_loans: 1,
                overdue_loans: 0,
                waitlist_entries: 1,
                feedback_entries: 1,
            }
        );
    }
}

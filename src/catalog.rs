use crate::{
    error::{missing, AppError, AppResult},
    library::{require_text, Library},
    models::{
        Book, BookChunk, BookData, BookFilter, BookPatch, BookQuery, CategoryCount, NewBook,
        UdcCount, User,
    },
};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

fn check_quantity(total_quantity: i32) -> AppResult<()> {
    if total_quantity < 0 {
        return Err(AppError::validation("total_quantity must not be negative"));
    }
    Ok(())
}

// Folds per-category counts into UDC main classes (the leading digit of the
// category), ordered by class. Categories that do not start with a digit are
// counted under `"other"`.
pub fn udc_main_classes(counts: Vec<CategoryCount>) -> Vec<UdcCount> {
    let mut classes: Vec<UdcCount> = vec![];

    for count in counts {
        let code = match count.category.trim().chars().next() {
            Some(c) if c.is_ascii_digit() => c.to_string(),
            _ => "other".to_string(),
        };

        match classes.iter_mut().find(|item| item.code == code) {
            Some(item) => {
                item.titles += count.titles;
                item.copies += count.copies;
            }
            None => classes.push(UdcCount {
                code,
                titles: count.titles,
                copies: count.copies,
            }),
        }
    }

    // digits sort before "other"
    classes.sort_by(|a, b| a.code.cmp(&b.code));
    classes
}

impl Library {
    pub async fn books(&self, query: BookQuery) -> AppResult<BookChunk> {
        let page_size = query
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let filter = BookFilter {
            text: query
                .q
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
            category: query
                .category
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
        };

        let chunk = self
            .store
            .query_books(&filter, page_size, query.page.unwrap_or(0))
            .await?;
        Ok(chunk)
    }

    pub async fn book(&self, id: i64) -> AppResult<Book> {
        Ok(self.store.find_book(id).await.map_err(missing("book"))?)
    }

    #[tracing::instrument(skip(self, admin, data), fields(admin_id = admin.id))]
    pub async fn create_book(&self, admin: &User, data: BookData) -> AppResult<Book> {
        check_quantity(data.total_quantity)?;
        let book = NewBook {
            title: require_text("title", &data.title)?,
            author: require_text("author", &data.author)?,
            isbn: require_text("isbn", &data.isbn)?,
            category: require_text("category", &data.category)?,
            description: data.description.trim().to_string(),
            image_url: data
                .image_url
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            total_quantity: data.total_quantity,
        };

        let book = self.store.insert_book(book).await?;
        tracing::info!(book_id = book.id, "added book");
        self.record_activity(
            "BOOK_ADDED",
            admin,
            format!("added \"{}\" ({} copies)", book.title, book.total_quantity),
        )
        .await;

        Ok(book)
    }

    #[tracing::instrument(skip(self, admin, patch), fields(admin_id = admin.id))]
    pub async fn update_book(&self, admin: &User, id: i64, patch: BookPatch) -> AppResult<Book> {
        if let Some(total) = patch.total_quantity {
            check_quantity(total)?;
        }
        let patch = BookPatch {
            title: patch.title.as_deref().map(|v| require_text("title", v)).transpose()?,
            author: patch.author.as_deref().map(|v| require_text("author", v)).transpose()?,
            isbn: patch.isbn.as_deref().map(|v| require_text("isbn", v)).transpose()?,
            category: patch
                .category
                .as_deref()
                .map(|v| require_text("category", v))
                .transpose()?,
            description: patch.description.map(|v| v.trim().to_string()),
            image_url: patch.image_url.map(|v| v.trim().to_string()),
            total_quantity: patch.total_quantity,
        };

        let book = self
            .store
            .update_book(id, patch)
            .await
            .map_err(missing("book"))?;
        tracing::info!(book_id = book.id, "updated book");
        self.record_activity("BOOK_UPDATED", admin, format!("updated \"{}\"", book.title))
            .await;

        Ok(book)
    }

    #[tracing::instrument(skip(self, admin), fields(admin_id = admin.id))]
    pub async fn delete_book(&self, admin: &User, id: i64) -> AppResult<Book> {
        let book = self
            .store
            .delete_book(id)
            .await
            .map_err(missing("book"))?;
        tracing::info!(book_id = book.id, "deleted book");
        self.record_activity("BOOK_DELETED", admin, format!("deleted \"{}\"", book.title))
            .await;

        Ok(book)
    }

    pub async fn udc_counts(&self) -> AppResult<Vec<UdcCount>> {
        let counts = self.store.category_counts().await?;
        Ok(udc_main_classes(counts))
    }
}

#[cfg(test)]
mod test {
    use super::udc_main_classes;
    use crate::error::AppError;
    use crate::library::testing;
    use crate::models::{BookPatch, BookQuery, CategoryCount, UdcCount};

    #[test]
    fn test_udc_main_classes() {
        let count = |category: &str, titles, copies| CategoryCount {
            category: category.to_string(),
            titles,
            copies,
        };
        let classes = udc_main_classes(vec![
            count("821.111", 2, 5),
            count("004.4", 1, 3),
            count("004", 1, 1),
            count("fiction", 1, 2),
            count("82", 1, 1),
        ]);

        assert_eq!(
            classes,
            vec![
                UdcCount {
                    code: "0".to_string(),
                    titles: 2,
                    copies: 4
                },
                UdcCount {
                    code: "8".to_string(),
                    titles: 3,
                    copies: 6
                },
                UdcCount {
                    code: "other".to_string(),
                    titles: 1,
                    copies: 2
                },
            ]
        );
    }

    #[actix_web::test]
    async fn test_query_and_paging() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        for title in ["Algorithms", "Compilers", "Databases", "Networks"] {
            testing::book(&library, &admin, title, 1).await;
        }

        let chunk = library
            .books(BookQuery {
                page_size: Some(3),
                page: Some(1),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(chunk.total_count, 4);
        assert_eq!(chunk.items.len(), 1);
        assert_eq!(chunk.items[0].title, "Networks");

        let chunk = library
            .books(BookQuery {
                q: Some("comp".to_string()),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(chunk.total_count, 1);
        assert_eq!(chunk.items[0].title, "Compilers");
    }

    #[actix_web::test]
    async fn test_page_past_the_end() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        testing::book(&library, &admin, "Compilers", 1).await;
        testing::book(&library, &admin, "Databases", 1).await;

        for page in [50_000_000, u32::MAX] {
            let chunk = library
                .books(BookQuery {
                    page_size: Some(100),
                    page: Some(page),
                    ..BookQuery::default()
                })
                .await
                .unwrap();
            assert!(chunk.items.is_empty());
            assert_eq!(chunk.total_count, 2);
        }
    }

    #[actix_web::test]
    async fn test_catalog_mutations_are_logged() {
        let library = testing::library();
        let admin = testing::admin(&library).await;
        let book = testing::book(&library, &admin, "Compilers", 2).await;
        assert_eq!(book.available_quantity, 2);

        let book = library
            .update_book(
                &admin,
                book.id,
                BookPatch {
                    total_quantity: Some(4),
                    ..BookPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(book.available_quantity, 4);

        library.delete_book(&admin, book.id).await.unwrap();
        let err = library.book(book.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let actions: Vec<_> = library
            .activities(10)
            .await
            .unwrap()
            .into_iter()
            .map(|activity| activity.action)
            .collect();
        assert_eq!(actions, ["BOOK_DELETED", "BOOK_UPDATED", "BOOK_ADDED"]);
    }

    #[actix_web::test]
    async fn test_update_book_validation() {
        let library = testing::library();
        let admin = testing::admin(&library).await;

        let err = library
            .update_book(
                &admin,
                42,
                BookPatch {
                    total_quantity: Some(-1),
                    ..BookPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = library
            .update_book(&admin, 42, BookPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}

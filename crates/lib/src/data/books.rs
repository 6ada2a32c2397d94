use crate::{
    constants::BOOKS_TABLE,
    errors::StoryTrackError,
    pagination::Pagination,
    providers::backend::{decode_rows, Query, TableProvider},
    types::{Book, CatalogFilter, CatalogSort},
};
use std::collections::BTreeSet;
use tracing::debug;

/// One page of results with the page math that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

fn catalog_query(filter: &CatalogFilter) -> Query {
    let mut query = Query::new();
    if let Some(genre) = filter.genre.as_deref().filter(|g| !g.trim().is_empty()) {
        query = query.contains("genres", [genre.trim()]);
    }
    if let Some(title) = filter.title_contains.as_deref().filter(|t| !t.trim().is_empty()) {
        query = query.ilike("title", &format!("%{}%", title.trim()));
    }
    match filter.sort {
        CatalogSort::Title => query.order("title", true),
        CatalogSort::Rating => query.order("average_rating", false).order("title", true),
        CatalogSort::Popular => query.order("ratings_count", false).order("title", true),
    }
}

/// Fetches one catalog page. `page` is 1-based.
pub async fn fetch_books(
    provider: &dyn TableProvider,
    filter: &CatalogFilter,
    page: usize,
    page_size: usize,
) -> Result<Paged<Book>, StoryTrackError> {
    if page_size == 0 {
        return Err(StoryTrackError::Validation(
            "page size must be greater than zero".to_string(),
        ));
    }
    let page = page.max(1);
    let requested = Pagination {
        page,
        page_size,
        total_items: 0,
    };
    let (from, to) = requested.range();
    let query = catalog_query(filter).range(from, to).with_count();

    let result = provider.select(BOOKS_TABLE, &query).await?;
    let items: Vec<Book> = decode_rows(result.rows)?;
    let total_items = result.total.unwrap_or(from + items.len());
    debug!(page, total_items, returned = items.len(), "Fetched catalog page");

    Ok(Paged {
        items,
        pagination: Pagination {
            page,
            page_size,
            total_items,
        },
    })
}

pub async fn get_book(
    provider: &dyn TableProvider,
    id: &str,
) -> Result<Option<Book>, StoryTrackError> {
    let query = Query::new().eq("id", id).limit(1);
    let result = provider.select(BOOKS_TABLE, &query).await?;
    Ok(decode_rows(result.rows)?.into_iter().next())
}

/// Fetches the given books. Unknown ids are skipped.
pub async fn fetch_books_by_ids(
    provider: &dyn TableProvider,
    ids: &[String],
) -> Result<Vec<Book>, StoryTrackError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let query = Query::new().in_list("id", ids.iter().cloned());
    let result = provider.select(BOOKS_TABLE, &query).await?;
    decode_rows(result.rows)
}

/// Every book in the catalog, in title order.
pub(crate) async fn fetch_all_books(
    provider: &dyn TableProvider,
) -> Result<Vec<Book>, StoryTrackError> {
    let result = provider
        .select(BOOKS_TABLE, &Query::new().order("title", true))
        .await?;
    decode_rows(result.rows)
}

/// Sorted, distinct genres across `books`.
pub fn list_genres(books: &[Book]) -> Vec<String> {
    books
        .iter()
        .flat_map(|b| b.genres.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_query_params() {
        let filter = CatalogFilter {
            genre: Some("Fantasy".to_string()),
            title_contains: Some(" ring ".to_string()),
            sort: CatalogSort::Rating,
        };
        let params = catalog_query(&filter).to_params();
        assert!(params.contains(&("genres".to_string(), "cs.{\"Fantasy\"}".to_string())));
        assert!(params.contains(&("title".to_string(), "ilike.%ring%".to_string())));
        assert!(params.contains(&(
            "order".to_string(),
            "average_rating.desc,title.asc".to_string()
        )));
    }

    #[test]
    fn test_list_genres_sorted_distinct() {
        let book = |genres: &[&str]| Book {
            id: "1".to_string(),
            title: "T".to_string(),
            authors: vec![],
            description: None,
            thumbnail: None,
            isbn: None,
            genres: genres.iter().map(|s| s.to_string()).collect(),
            average_rating: None,
            ratings_count: 0,
        };
        let genres = list_genres(&[book(&["Sci-Fi", "Classic"]), book(&["Classic", "Fantasy"])]);
        assert_eq!(genres, vec!["Classic", "Fantasy", "Sci-Fi"]);
    }
}

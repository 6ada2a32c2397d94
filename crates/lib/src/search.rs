//! # Catalog Search
//!
//! Client-side fuzzy filtering over the books already loaded into the store.
//! Scoring is a tiered match: whole-field and substring matches rank above
//! scattered in-order character matches, which are penalised by how spread
//! out the matched characters are.

use crate::types::Book;

/// Which field produced a hit's best score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Title,
    Author,
    Genre,
    Isbn,
    /// The query was empty.
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub book: Book,
    pub score: f64,
    pub field: MatchField,
}

const TITLE_WEIGHT: f64 = 1.0;
const AUTHOR_WEIGHT: f64 = 0.8;
const GENRE_WEIGHT: f64 = 0.5;

/// Scores how well `needle` matches `haystack`, in `[0, 1]`. `None` means no match.
pub fn fuzzy_score(needle: &str, haystack: &str) -> Option<f64> {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return Some(1.0);
    }
    let hay = haystack.to_lowercase();
    if hay.is_empty() {
        return None;
    }

    if hay == needle {
        return Some(1.0);
    }
    if hay.starts_with(&needle) {
        return Some(0.95);
    }
    if let Some(pos) = hay.find(&needle) {
        let at_word_start = hay[..pos]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_alphanumeric());
        return Some(if at_word_start { 0.9 } else { 0.8 });
    }

    subsequence_score(&needle, &hay)
}

/// In-order character match; the tighter the span, the higher the score.
fn subsequence_score(needle: &str, hay: &str) -> Option<f64> {
    let needle: Vec<char> = needle.chars().filter(|c| !c.is_whitespace()).collect();
    let hay: Vec<char> = hay.chars().collect();
    if needle.is_empty() {
        return None;
    }

    // Try every occurrence of the first character and keep the tightest span.
    let tightest = (0..hay.len())
        .filter(|&start| hay[start] == needle[0])
        .filter_map(|start| {
            let mut cursor = start + 1;
            for wanted in &needle[1..] {
                let offset = hay[cursor..].iter().position(|c| c == wanted)?;
                cursor += offset + 1;
            }
            Some(cursor - start)
        })
        .min()?;

    Some(0.6 * needle.len() as f64 / tightest as f64)
}

fn best_of<'a>(query: &str, values: impl Iterator<Item = &'a String>) -> Option<f64> {
    values
        .filter_map(|v| fuzzy_score(query, v))
        .max_by(|a, b| a.total_cmp(b))
}

fn digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// Scores one book against a query, returning its best weighted field.
pub fn score_book(book: &Book, query: &str) -> Option<(f64, MatchField)> {
    if query.trim().is_empty() {
        return Some((1.0, MatchField::Any));
    }

    let query_digits = digits(query);
    if query_digits.len() >= 10 {
        if let Some(isbn) = &book.isbn {
            if digits(isbn) == query_digits {
                return Some((1.0, MatchField::Isbn));
            }
        }
    }

    let candidates = [
        fuzzy_score(query, &book.title).map(|s| (s * TITLE_WEIGHT, MatchField::Title)),
        best_of(query, book.authors.iter()).map(|s| (s * AUTHOR_WEIGHT, MatchField::Author)),
        best_of(query, book.genres.iter()).map(|s| (s * GENRE_WEIGHT, MatchField::Genre)),
    ];
    candidates
        .into_iter()
        .flatten()
        .max_by(|a, b| a.0.total_cmp(&b.0))
}

/// Filters and ranks books by fuzzy relevance. Ties keep catalog order.
pub fn filter_books(books: &[Book], query: &str, threshold: f64) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = books
        .iter()
        .filter_map(|book| {
            let (score, field) = score_book(book, query)?;
            (score >= threshold).then(|| SearchHit {
                book: book.clone(),
                score,
                field,
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: &str, title: &str, authors: &[&str], genres: &[&str]) -> Book {
        Book {
            id: id.to_string(),
            title: title.to_string(),
            authors: authors.iter().map(|s| s.to_string()).collect(),
            description: None,
            thumbnail: None,
            isbn: None,
            genres: genres.iter().map(|s| s.to_string()).collect(),
            average_rating: None,
            ratings_count: 0,
        }
    }

    #[test]
    fn test_fuzzy_score_tiers() {
        assert_eq!(fuzzy_score("dune", "Dune"), Some(1.0));
        assert_eq!(fuzzy_score("the", "The Hobbit"), Some(0.95));
        assert_eq!(fuzzy_score("hobbit", "The Hobbit"), Some(0.9));
        assert_eq!(fuzzy_score("obbi", "The Hobbit"), Some(0.8));
        assert!(fuzzy_score("zzz", "The Hobbit").is_none());
        assert_eq!(fuzzy_score("", "anything"), Some(1.0));
    }

    #[test]
    fn test_subsequence_prefers_tight_matches() {
        let tight = fuzzy_score("hbt", "hobbit").unwrap();
        let loose = fuzzy_score("hbt", "h o b b i t t t").unwrap();
        assert!(tight > loose);
        assert!(tight < 0.8);
    }

    #[test]
    fn test_filter_books_ranks_title_above_genre() {
        let books = vec![
            book("1", "A Fantasy Primer", &["Someone"], &["Reference"]),
            book("2", "Mistborn", &["Brandon Sanderson"], &["Fantasy"]),
            book("3", "Emma", &["Jane Austen"], &["Romance"]),
        ];
        let hits = filter_books(&books, "fantasy", 0.3);
        let ids: Vec<&str> = hits.iter().map(|h| h.book.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(hits[0].field, MatchField::Title);
        assert_eq!(hits[1].field, MatchField::Genre);
    }

    #[test]
    fn test_filter_books_matches_author_typos_by_subsequence() {
        let books = vec![book("3", "Emma", &["Jane Austen"], &["Romance"])];
        let hits = filter_books(&books, "austn", 0.3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].field, MatchField::Author);
    }

    #[test]
    fn test_isbn_lookup_ignores_dashes() {
        let mut dune = book("1", "Dune", &["Frank Herbert"], &[]);
        dune.isbn = Some("978-0-441-17271-9".to_string());
        let hits = filter_books(&[dune], "9780441172719", 0.5);
        assert_eq!(hits[0].field, MatchField::Isbn);
    }

    #[test]
    fn test_empty_query_keeps_order() {
        let books = vec![book("1", "B", &[], &[]), book("2", "A", &[], &[])];
        let hits = filter_books(&books, "  ", 0.9);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].book.id, "1");
    }
}

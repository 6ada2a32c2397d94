//! # Terminal Output
//!
//! Plain-text tables and summaries for the `storytrack` commands.

use std::collections::HashMap;
use storytrack::data::{Paged, ReadingStats};
use storytrack::geo::Store;
use storytrack::providers::backend::Session;
use storytrack::search::SearchHit;
use storytrack::store::BooksSlice;
use storytrack::types::{Book, Comment, ReadStatus, RecommendedBook, UserBook};

const MAX_CELL: usize = 40;

/// A left-aligned, space-padded table.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<const N: usize>(headers: [&str; N]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells.into_iter().map(|c| truncate(&c, MAX_CELL)).collect());
    }

    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let line = |cells: &[String]| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{cell:<width$}", width = *w))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut out = vec![line(self.headers.as_slice())];
        out.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("  "),
        );
        out.extend(self.rows.iter().map(|r| line(r.as_slice())));
        out.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{head}…")
}

fn rating(book: &Book) -> String {
    book.average_rating
        .map(|r| format!("{r:.1}"))
        .unwrap_or_else(|| "-".to_string())
}

fn status_cell(status: ReadStatus) -> String {
    match status {
        ReadStatus::None => String::new(),
        other => other.to_string(),
    }
}

pub fn print_catalog(page: &Paged<Book>, books: &BooksSlice) {
    if page.items.is_empty() {
        println!("No books found.");
        return;
    }
    let mut table = Table::new(["ID", "TITLE", "AUTHORS", "RATING", "FAV", "STATUS"]);
    for book in &page.items {
        table.row(vec![
            book.id.clone(),
            book.title.clone(),
            book.authors.join(", "),
            rating(book),
            if books.is_favorite(&book.id) { "★" } else { "" }.to_string(),
            status_cell(books.status(&book.id)),
        ]);
    }
    table.print();
    let p = &page.pagination;
    println!(
        "\nPage {} of {} ({} books)",
        p.page,
        p.total_pages().max(1),
        p.total_items
    );
}

pub fn print_search_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No books found.");
        return;
    }
    let mut table = Table::new(["ID", "TITLE", "AUTHORS", "MATCH", "SCORE"]);
    for hit in hits {
        table.row(vec![
            hit.book.id.clone(),
            hit.book.title.clone(),
            hit.book.authors.join(", "),
            format!("{:?}", hit.field).to_lowercase(),
            format!("{:.2}", hit.score),
        ]);
    }
    table.print();
}

pub fn print_book(book: &Book, entry: Option<&UserBook>) {
    println!("{}", book.title);
    if !book.authors.is_empty() {
        println!("by {}", book.authors.join(", "));
    }
    println!();
    if !book.genres.is_empty() {
        println!("Genres:  {}", book.genres.join(", "));
    }
    println!("Rating:  {} ({} ratings)", rating(book), book.ratings_count);
    if let Some(isbn) = &book.isbn {
        println!("ISBN:    {isbn}");
    }
    if let Some(entry) = entry {
        println!("Status:  {}", entry.read_status);
        if let Some(r) = entry.rating {
            println!("Yours:   {}", "★".repeat(r as usize));
        }
        if entry.favorite {
            println!("In your favorites");
        }
    }
    if let Some(description) = &book.description {
        println!("\n{description}");
    }
}

pub fn print_reading_list(entries: &[UserBook], books: &[Book]) {
    if entries.is_empty() {
        println!("Your reading list is empty.");
        return;
    }
    let titles: HashMap<&str, &str> = books
        .iter()
        .map(|b| (b.id.as_str(), b.title.as_str()))
        .collect();
    let mut table = Table::new(["#", "ID", "TITLE", "STATUS", "RATING", "FAV"]);
    for (i, entry) in entries.iter().enumerate() {
        table.row(vec![
            (i + 1).to_string(),
            entry.book_id.clone(),
            titles.get(entry.book_id.as_str()).copied().unwrap_or("?").to_string(),
            entry.read_status.to_string(),
            entry.rating.map(|r| r.to_string()).unwrap_or_default(),
            if entry.favorite { "★" } else { "" }.to_string(),
        ]);
    }
    table.print();
}

pub fn comment_line(comment: &Comment) -> String {
    let when = comment
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "pending".to_string());
    format!("[{when}] {}: {}", comment.user_id, comment.content)
}

pub fn print_comments(comments: &[Comment]) {
    if comments.is_empty() {
        println!("No comments yet.");
        return;
    }
    for comment in comments {
        println!("{}", comment_line(comment));
    }
}

pub fn print_recommendations(recs: &[RecommendedBook]) {
    if recs.is_empty() {
        println!("No recommendations right now.");
        return;
    }
    let mut table = Table::new(["ID", "TITLE", "SCORE", "WHY"]);
    for rec in recs {
        table.row(vec![
            rec.book.id.clone(),
            rec.book.title.clone(),
            format!("{:.0}", rec.recommendation.score),
            rec.recommendation.reason.clone(),
        ]);
    }
    table.print();
}

pub fn print_stats(stats: &ReadingStats) {
    println!("Tracked:    {}", stats.total_tracked);
    println!("Reading:    {}", stats.reading);
    println!(
        "Finished:   {} ({:.0}%)",
        stats.finished,
        stats.completion_rate * 100.0
    );
    println!("Favorites:  {}", stats.favorites);
    println!("Comments:   {}", stats.comments_posted);
    match stats.average_rating {
        Some(avg) => println!("Avg rating: {avg:.2} over {} books", stats.rated),
        None => println!("Avg rating: -"),
    }

    println!("\nRatings");
    for (i, count) in stats.rating_histogram.iter().enumerate().rev() {
        println!("  {} {:<5} {}", i + 1, "★".repeat(i + 1), "#".repeat(*count));
    }

    for (label, counts) in [("Top genres", &stats.top_genres), ("Top authors", &stats.top_authors)] {
        if counts.is_empty() {
            continue;
        }
        println!("\n{label}");
        for (name, count) in counts {
            println!("  {name} ({count})");
        }
    }
}

pub fn print_stores(ranked: &[(Store, f64)]) {
    let mut table = Table::new(["STORE", "ADDRESS", "DISTANCE"]);
    for (store, km) in ranked {
        table.row(vec![
            store.name.clone(),
            store.address.clone(),
            format!("{km:.1} km"),
        ]);
    }
    table.print();
}

pub fn print_session(session: &Session) {
    let user = &session.user;
    println!("Signed in as {}", user.username().unwrap_or("(no username)"));
    if let Some(email) = &user.email {
        println!("Email:   {email}");
    }
    println!("User id: {}", user.id);
    println!("Expires: {}", session.expires_at.format("%Y-%m-%d %H:%M UTC"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_pads_columns() {
        let mut table = Table::new(["ID", "TITLE"]);
        table.row(vec!["1".to_string(), "Dune".to_string()]);
        table.row(vec!["12".to_string(), "Emma".to_string()]);

        let rendered = table.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "ID  TITLE");
        assert_eq!(lines[1], "--  -----");
        assert_eq!(lines[2], "1   Dune");
        assert_eq!(lines[3], "12  Emma");
    }

    #[test]
    fn test_long_cells_are_truncated() {
        let long = "x".repeat(60);
        let cut = truncate(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate("short", 10), "short");
    }
}

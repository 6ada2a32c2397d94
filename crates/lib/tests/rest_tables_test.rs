//! # REST Table Provider Tests
//!
//! Verifies the wire format of `RestTableProvider` against a mock table API:
//! query-string filters, auth headers, `Prefer` headers and error mapping.

mod common;

use common::setup_tracing;
use serde_json::json;
use storytrack::errors::StoryTrackError;
use storytrack::providers::backend::{Query, RestTableProvider, TableProvider};
use wiremock::matchers::{body_json, header, headers, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANON_KEY: &str = "anon-key";

fn provider(server: &MockServer) -> RestTableProvider {
    RestTableProvider::new(server.uri(), ANON_KEY.to_string()).unwrap()
}

#[tokio::test]
async fn test_select_sends_filters_and_reads_total() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/books"))
        .and(query_param("select", "*"))
        .and(query_param("genres", "cs.{\"Fantasy\"}"))
        .and(query_param("order", "title.asc"))
        .and(query_param("offset", "12"))
        .and(query_param("limit", "12"))
        .and(header("apikey", ANON_KEY))
        .and(header("authorization", "Bearer anon-key"))
        .and(header("prefer", "count=exact"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "12-13/14")
                .set_body_json(json!([
                    {"id": "13", "title": "Mistborn", "genres": ["Fantasy"]},
                    {"id": "14", "title": "The Hobbit", "genres": ["Fantasy"]}
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::new()
        .contains("genres", ["Fantasy"])
        .order("title", true)
        .range(12, 23)
        .with_count();

    // --- 2. Act ---
    let page = provider(&server).select("books", &query).await.unwrap();

    // --- 3. Assert ---
    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.total, Some(14));
    assert_eq!(page.rows[0]["title"], "Mistborn");
}

#[tokio::test]
async fn test_signed_in_requests_use_the_session_token() {
    setup_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/user_books"))
        .and(header("apikey", ANON_KEY))
        .and(header("authorization", "Bearer user-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    provider.set_access_token(Some("user-jwt".to_string()));
    let page = provider
        .select("user_books", &Query::new().eq("user_id", "u1"))
        .await
        .unwrap();

    assert!(page.rows.is_empty());
    assert_eq!(page.total, None);
}

#[tokio::test]
async fn test_upsert_merges_on_conflict_columns() {
    setup_tracing();
    let server = MockServer::start().await;
    let row = json!({"user_id": "u1", "book_id": "b1", "favorite": true});

    Mock::given(method("POST"))
        .and(path("/rest/v1/user_books"))
        .and(query_param("on_conflict", "user_id,book_id"))
        // wiremock splits request header values on ',', so the comma-joined
        // Prefer value is matched as its individual parts.
        .and(headers(
            "prefer",
            vec!["resolution=merge-duplicates", "return=representation"],
        ))
        .and(body_json(json!([row.clone()])))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row.clone()])))
        .expect(1)
        .mount(&server)
        .await;

    let stored = provider(&server)
        .upsert("user_books", vec![row.clone()], &["user_id", "book_id"])
        .await
        .unwrap();
    assert_eq!(stored, vec![row]);
}

#[tokio::test]
async fn test_update_patches_matching_rows() {
    setup_tracing();
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/recommendations"))
        .and(query_param("user_id", "eq.u1"))
        .and(query_param("book_id", "eq.b2"))
        .and(body_json(json!({"is_dismissed": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"user_id": "u1", "book_id": "b2", "is_dismissed": true}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::new().eq("user_id", "u1").eq("book_id", "b2");
    let updated = provider(&server)
        .update("recommendations", &query, json!({"is_dismissed": true}))
        .await
        .unwrap();
    assert_eq!(updated.len(), 1);
}

#[tokio::test]
async fn test_unfiltered_update_is_refused_locally() {
    setup_tracing();
    let server = MockServer::start().await;

    let result = provider(&server)
        .update("books", &Query::new(), json!({"title": "oops"}))
        .await;
    assert!(matches!(result, Err(StoryTrackError::Validation(_))));

    let result = provider(&server).delete("books", &Query::new()).await;
    assert!(matches!(result, Err(StoryTrackError::Validation(_))));
}

#[tokio::test]
async fn test_delete_counts_removed_rows() {
    setup_tracing();
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/comments"))
        .and(query_param("id", "eq.c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "c1"}])))
        .mount(&server)
        .await;

    let removed = provider(&server)
        .delete("comments", &Query::new().eq("id", "c1"))
        .await
        .unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn test_api_errors_carry_status_and_message() {
    setup_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/comments"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "42501",
            "message": "new row violates row-level security policy for table \"comments\""
        })))
        .mount(&server)
        .await;

    let result = provider(&server)
        .insert("comments", vec![json!({"content": "hi"})])
        .await;

    match result {
        Err(StoryTrackError::BackendApi { status, message }) => {
            assert_eq!(status, 403);
            assert!(message.contains("row-level security"));
        }
        other => panic!("expected BackendApi error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_write_response_is_not_an_error() {
    setup_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let stored = provider(&server)
        .insert("profiles", vec![json!({"id": "u1", "username": "reader"})])
        .await
        .unwrap();
    assert!(stored.is_empty());
}

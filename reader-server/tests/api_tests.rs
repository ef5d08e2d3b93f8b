use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde_json::{json, Value};
use url::Url;

use reader_core::feed::{uuid_from_string, Article, Feed};
use reader_core::storage::{InMemoryStorage, Storage};
use reader_server::api;

/// Parses a timestamp the way the offset query parameter is parsed, so
/// expectations hold in any server time zone.
fn time_from_str(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, api::OFFSET_TIME_FORMAT)
        .expect("valid test timestamp")
        .and_local_timezone(Local)
        .single()
        .expect("unambiguous local timestamp")
        .with_timezone(&Utc)
}

fn feed(link: &str, title: &str) -> Feed {
    let mut feed = Feed::new(Url::parse(link).expect("valid test URL"));
    feed.title = title.to_string();
    feed.link = link.to_string();
    feed
}

fn article(link: &str, title: &str, description: &str, published: &str) -> Article {
    Article {
        guid: None,
        link: link.to_string(),
        published: time_from_str(published),
        title: title.to_string(),
        description: description.to_string(),
        image: None,
    }
}

fn mock_feeds() -> Vec<Feed> {
    vec![
        feed("https://mock.local", "Mock Feed"),
        feed("https://mock2.local", "Mock Feed 2"),
    ]
}

fn mock_articles() -> (Vec<Article>, Vec<Article>) {
    (
        vec![
            article(
                "https://mock.local/article/1",
                "Article 1",
                "This is the first article",
                "2010-01-01T01:01:01",
            ),
            article(
                "https://mock.local/article/2",
                "Article 2",
                "This is the second article",
                "2020-01-01T01:01:01",
            ),
        ],
        vec![
            article(
                "https://mock2.local/article/1",
                "Article 1",
                "This is the first article in second feed",
                "2010-01-01T01:01:02",
            ),
            article(
                "https://mock2.local/article/2",
                "Article 2",
                "This is the second article in second feed",
                "2020-01-01T01:01:02",
            ),
        ],
    )
}

async fn test_server(min_latest: usize) -> TestServer {
    let storage = Arc::new(InMemoryStorage::new(min_latest));
    let feeds = mock_feeds();
    let (first, second) = mock_articles();

    storage
        .store(feeds[0].clone(), first)
        .await
        .expect("store first feed");
    storage
        .store(feeds[1].clone(), second)
        .await
        .expect("store second feed");

    TestServer::new(api::router(storage)).expect("test server")
}

#[tokio::test]
async fn feeds_are_listed_in_title_order_with_injected_fields() {
    let server = test_server(2).await;

    let response = server.get("/feeds").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body, serde_json::to_value(mock_feeds()).unwrap());

    // The identifier and the stringified URL are injected fields.
    assert_eq!(
        body[0]["UUID"],
        json!(uuid_from_string("https://mock.local").to_string())
    );
    assert_eq!(body[0]["FeedLink"], json!("https://mock.local"));
}

#[tokio::test]
async fn latest_returns_all_articles_newest_first() {
    let server = test_server(4).await;

    let response = server.get("/latest").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let (first, second) = mock_articles();
    let want = vec![
        second[1].clone(),
        first[1].clone(),
        second[0].clone(),
        first[0].clone(),
    ];
    assert_eq!(response.json::<Value>(), serde_json::to_value(want).unwrap());
}

#[tokio::test]
async fn latest_pages_by_offset() {
    let server = test_server(4).await;

    let response = server
        .get("/latest")
        .add_query_param("offset", "2015-01-01T01:01:01")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let (first, second) = mock_articles();
    let want = vec![second[0].clone(), first[0].clone()];
    assert_eq!(response.json::<Value>(), serde_json::to_value(want).unwrap());
}

#[tokio::test]
async fn latest_excludes_the_article_published_exactly_at_the_offset() {
    let server = test_server(4).await;

    let response = server
        .get("/latest")
        .add_query_param("offset", "2010-01-01T01:01:02")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let (first, _) = mock_articles();
    let want = vec![first[0].clone()];
    assert_eq!(response.json::<Value>(), serde_json::to_value(want).unwrap());
}

#[tokio::test]
async fn latest_honors_the_configured_minimum() {
    let server = test_server(1).await;

    let response = server.get("/latest").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let (_, second) = mock_articles();
    let want = vec![second[1].clone()];
    assert_eq!(response.json::<Value>(), serde_json::to_value(want).unwrap());
}

#[tokio::test]
async fn latest_returns_more_than_the_minimum_when_times_tie() {
    let storage = Arc::new(InMemoryStorage::new(1));
    storage
        .store(
            feed("https://mock.local", "Mock Feed"),
            vec![
                article(
                    "https://mock.local/article/1",
                    "Article 1",
                    "",
                    "2020-01-01T01:01:01",
                ),
                article(
                    "https://mock.local/article/2",
                    "Article 2",
                    "",
                    "2020-01-01T01:01:01",
                ),
                article(
                    "https://mock.local/article/3",
                    "Article 3",
                    "",
                    "2010-01-01T01:01:01",
                ),
            ],
        )
        .await
        .expect("store feed");
    let server = TestServer::new(api::router(storage)).expect("test server");

    let response = server.get("/latest").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    let page = body.as_array().expect("array body");
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn latest_from_feed_is_scoped_to_that_feed() {
    let server = test_server(4).await;

    let id = uuid_from_string("https://mock2.local");
    let response = server.get(&format!("/latest/{id}")).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let (_, second) = mock_articles();
    let want = vec![second[1].clone(), second[0].clone()];
    assert_eq!(response.json::<Value>(), serde_json::to_value(want).unwrap());
}

#[tokio::test]
async fn article_is_returned_by_identifier() {
    let server = test_server(4).await;

    let id = uuid_from_string("https://mock2.local/article/2");
    let response = server.get(&format!("/article/{id}")).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let (_, second) = mock_articles();
    assert_eq!(
        response.json::<Value>(),
        serde_json::to_value(&second[1]).unwrap()
    );
}

#[tokio::test]
async fn missing_article_is_a_server_error() {
    let server = test_server(4).await;

    let id = uuid_from_string("oops");
    let response = server.get(&format!("/article/{id}")).await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json::<Value>(),
        json!({"Message": "could not retrieve article"})
    );
}

#[tokio::test]
async fn missing_feed_is_a_server_error() {
    let server = test_server(4).await;

    let id = uuid_from_string("oops");
    let response = server.get(&format!("/latest/{id}")).await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json::<Value>(),
        json!({"Message": "could not retrieve latest articles from feed"})
    );
}

#[tokio::test]
async fn malformed_identifiers_are_rejected() {
    let server = test_server(4).await;

    for route in ["/latest/not-a-uuid", "/article/not-a-uuid"] {
        let response = server.get(route).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<Value>(),
            json!({"Message": "UUID not found"})
        );
    }
}

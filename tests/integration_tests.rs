//! Integration tests for the feedhub backend
//!
//! These tests verify the full workflow from configuration loading through
//! database sync, search and the HTTP surface.

use std::io::Write;
use tempfile::NamedTempFile;

mod common {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use feedhub::config::ThemeConfig;
    use feedhub::db::Database;
    use feedhub::listing::Listing;
    use feedhub::models::Article;
    use feedhub::routes::{self, AppState};
    use feedhub::search::SearchIndex;
    use tempfile::TempDir;

    pub const SESSION: &str = "session-bob";

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub fn create_article(id: &str, feed: &str, title: &str, day: u32) -> Article {
        Article {
            id: id.to_string(),
            feed: feed.to_string(),
            title: title.to_string(),
            description: String::new(),
            tags: vec!["news".to_string()],
            body: format!("{} in full", title),
            date_published: Some(Utc.with_ymd_and_hms(2024, 6, day, 9, 0, 0).unwrap()),
            is_del: false,
            kind: "syndicated".to_string(),
        }
    }

    pub fn create_theme(id: &str, sort: i64, feeds: &[&str]) -> ThemeConfig {
        ThemeConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            desc: format!("All about {}", id),
            image: None,
            sort,
            feeds: feeds.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// File-backed database with two themes, one featured feed, four
    /// articles and a session for `bob`.
    pub async fn seeded_database(temp_dir: &TempDir) -> (Arc<Database>, Vec<Article>) {
        let db = Database::new(&create_db_path(temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        db.sync_themes(&[
            create_theme("programming", 1, &["lobsters"]),
            create_theme("science", 2, &["quanta"]),
        ])
        .await
        .unwrap();
        db.sync_featured_feeds(&["lobsters".to_string()])
            .await
            .unwrap();
        db.put_session(SESSION, "bob").await.unwrap();

        let articles = vec![
            create_article("l1", "lobsters", "Parsing with nom", 1),
            create_article("l2", "lobsters", "Zero cost futures", 2),
            create_article("l3", "lobsters", "Writing a linker", 3),
            create_article("q1", "quanta", "Prime gaps", 4),
        ];
        for article in &articles {
            db.upsert_article(article).await.unwrap();
        }

        (Arc::new(db), articles)
    }

    pub fn app(db: Arc<Database>, search: Arc<dyn SearchIndex>) -> axum::Router {
        let listing = Listing::new(db, search)
            .with_article_types(vec!["syndicated".to_string()])
            .with_timeouts(Duration::from_millis(500), Duration::from_secs(2));
        routes::router(Arc::new(AppState { listing }))
    }
}

#[cfg(test)]
mod config_integration_tests {
    use super::*;
    use feedhub::config::Config;

    #[test]
    fn test_load_shipped_config() {
        let config = Config::load("feedhub.toml");
        assert!(config.is_ok(), "Failed to load feedhub.toml: {:?}", config.err());

        let config = config.unwrap();
        assert!(!config.themes.is_empty(), "feedhub.toml should define themes");
        assert!(
            !config.featured_feeds.is_empty(),
            "feedhub.toml should feature at least one feed"
        );
        for feed in &config.featured_feeds {
            assert!(
                config.themes.iter().any(|t| t.feeds.contains(feed)),
                "featured feed {} belongs to no theme",
                feed
            );
        }
    }

    #[test]
    fn test_config_from_file() {
        let toml_content = r#"
            listen = "127.0.0.1:4000"
            featured_feeds = ["lobsters"]

            [search]
            url = "http://search.internal:9200"
            timeout_ms = 750

            [[themes]]
            id = "programming"
            name = "Programming"
            feeds = ["lobsters", "hacker-news"]
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.listen, "127.0.0.1:4000");
        assert_eq!(config.search.url.as_deref(), Some("http://search.internal:9200"));
        assert_eq!(config.search.timeout_ms, 750);
        assert_eq!(config.store.timeout_ms, 2000);
        assert_eq!(config.themes[0].feeds, vec!["lobsters", "hacker-news"]);
    }
}

#[cfg(test)]
mod database_integration_tests {
    use super::common::*;
    use feedhub::db::{Database, DocumentStore};
    use feedhub::models::{CollectKind, Toggle};

    #[tokio::test]
    async fn test_database_persistence() {
        let temp_dir = create_temp_dir();

        {
            let (db, _articles) = seeded_database(&temp_dir).await;
            assert_eq!(
                db.toggle_collect("bob", CollectKind::Article, "l2")
                    .await
                    .unwrap(),
                Toggle::Added
            );
            db.close().await;
        }

        // Reopen without reinitializing
        {
            let db = Database::new(&create_db_path(&temp_dir)).await.unwrap();

            assert_eq!(db.all_themes().await.unwrap().len(), 2);
            assert_eq!(db.featured_feeds().await.unwrap(), vec!["lobsters"]);
            assert_eq!(
                db.collected_ids("bob", CollectKind::Article).await.unwrap(),
                vec!["l2"]
            );
            assert_eq!(
                db.resolve_session(SESSION).await.unwrap().as_deref(),
                Some("bob")
            );
        }
    }

    #[tokio::test]
    async fn test_resync_on_restart() {
        let temp_dir = create_temp_dir();
        let (db, _articles) = seeded_database(&temp_dir).await;

        db.sync_themes(&[create_theme("programming", 5, &["lobsters", "hn"])])
            .await
            .unwrap();
        db.sync_featured_feeds(&["hn".to_string()]).await.unwrap();

        let themes = db.all_themes().await.unwrap();
        assert_eq!(themes[0].id, "science");
        assert_eq!(themes[1].feeds, vec!["lobsters", "hn"]);
        assert_eq!(db.featured_feeds().await.unwrap(), vec!["hn"]);
    }

    #[tokio::test]
    async fn test_concurrent_toggles_keep_unique_records() {
        let temp_dir = create_temp_dir();
        let (db, _articles) = seeded_database(&temp_dir).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move {
                    db.toggle_collect("bob", CollectKind::Theme, "science")
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let count = db.count_collects("bob", CollectKind::Theme).await.unwrap();
        assert!(count <= 1);
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use super::common::*;
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use feedhub::search::{ElasticIndex, MemoryIndex};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_header() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("sessionid"),
            HeaderValue::from_static(SESSION),
        )
    }

    fn ids(list: &Value) -> Vec<String> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|a| a["_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_browse_collect_and_review() {
        let temp_dir = create_temp_dir();
        let (db, articles) = seeded_database(&temp_dir).await;
        let index = Arc::new(MemoryIndex::from_articles(&articles).await);
        let server = TestServer::new(app(db, index)).unwrap();
        let (name, value) = session_header();

        let response = server
            .get("/api/project/list")
            .add_header(name.clone(), value.clone())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(ids(&body["projectList"]), vec!["l3", "l2", "l1"]);
        assert_eq!(body["themeList"]["programming"]["name"], "PROGRAMMING");

        let response = server
            .post("/api/project/toggleCollect")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "id": "l1" }))
            .await;
        assert_eq!(response.json::<Value>(), json!({ "operator": "add" }));

        let response = server
            .post("/api/theme/toggleCollect")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "id": "science" }))
            .await;
        assert_eq!(response.json::<Value>(), json!({ "operator": "add" }));

        let response = server
            .get("/api/project/list")
            .add_query_param("themeId", "subscribe")
            .add_header(name.clone(), value.clone())
            .await;
        assert_eq!(ids(&response.json::<Value>()["projectList"]), vec!["q1"]);

        let response = server
            .get("/api/projectCollect/list")
            .add_header(name.clone(), value.clone())
            .await;
        let collected: Value = response.json();
        assert_eq!(ids(&collected), vec!["l1"]);
        assert_eq!(collected[0]["isCollected"], true);

        let response = server
            .get("/api/user/info")
            .add_header(name, value)
            .await;
        assert_eq!(
            response.json::<Value>(),
            json!({
                "projectCollectCount": 1,
                "projectNoteCount": 0,
                "themeCollectCount": 1
            })
        );
    }

    #[tokio::test]
    async fn test_requests_without_session_are_rejected() {
        let temp_dir = create_temp_dir();
        let (db, articles) = seeded_database(&temp_dir).await;
        let index = Arc::new(MemoryIndex::from_articles(&articles).await);
        let server = TestServer::new(app(db, index)).unwrap();

        let response = server.get("/api/theme/list").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), "OK");
    }

    #[tokio::test]
    async fn test_search_service_order_is_kept() {
        let search = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/articles/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "hits": [{ "_id": "l1" }, { "_id": "gone" }, { "_id": "l3" }] }
            })))
            .mount(&search)
            .await;

        let temp_dir = create_temp_dir();
        let (db, _articles) = seeded_database(&temp_dir).await;
        let index =
            Arc::new(ElasticIndex::new(&search.uri(), "articles", Duration::from_secs(1)).unwrap());
        let server = TestServer::new(app(db, index)).unwrap();
        let (name, value) = session_header();

        let response = server
            .get("/api/project/list")
            .add_query_param("keyword", "linker")
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(ids(&response.json::<Value>()["projectList"]), vec!["l1", "l3"]);
    }

    #[tokio::test]
    async fn test_unreachable_search_service_is_inner_error() {
        let temp_dir = create_temp_dir();
        let (db, _articles) = seeded_database(&temp_dir).await;
        let index = Arc::new(
            ElasticIndex::new("http://127.0.0.1:1", "articles", Duration::from_millis(300))
                .unwrap(),
        );
        let server = TestServer::new(app(db, index)).unwrap();
        let (name, value) = session_header();

        let response = server
            .get("/api/project/list")
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.json::<Value>(),
            json!({ "status": "error", "msg": "system inner error" })
        );
    }

    #[tokio::test]
    async fn test_past_last_page_is_empty() {
        let temp_dir = create_temp_dir();
        let (db, articles) = seeded_database(&temp_dir).await;
        let index = Arc::new(MemoryIndex::from_articles(&articles).await);
        let server = TestServer::new(app(db, index)).unwrap();
        let (name, value) = session_header();

        let response = server
            .get("/api/themeCollect/list")
            .add_query_param("page", 41)
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>(), json!([]));
    }
}

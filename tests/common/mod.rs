#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;

use bugger::core::config::{
    Config, DatabaseConfig, ExecutorConfig, LoggingConfig, MailConfig, PaginationConfig,
    ServerConfig,
};
use bugger::core::types::{
    NewPost, NewReport, NewTopic, NewUser, Post, Report, ReportType, Severity, Topic, User,
    UserRole,
};
use bugger::storage::database::Database;
use bugger::storage::repositories::{PostRepository, ReportRepository, TopicRepository, UserRepository};

/// A migrated database living in a temporary directory. The directory is
/// removed when the value is dropped.
pub struct TestDb {
    pub db: Arc<Database>,
    pub config: Config,
    _dir: TempDir,
}

pub fn test_config(url: String) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
        },
        database: DatabaseConfig {
            url,
            min_connections: 1,
            max_connections: 4,
            acquire_timeout_secs: 2,
        },
        executor: ExecutorConfig { workers: 1 },
        mail: MailConfig {
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            from_address: "bugger@localhost".to_string(),
        },
        pagination: PaginationConfig {
            default_page_size: 3,
            max_page_size: 50,
        },
        logging: LoggingConfig {
            filter: "bugger=debug".to_string(),
        },
    }
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("bugger.db").display());
    let config = test_config(url);

    let db = Database::new(&config.database).await.unwrap();
    db.migrate().await.unwrap();

    TestDb {
        db: Arc::new(db),
        config,
        _dir: dir,
    }
}

pub async fn user(db: &Database, username: &str, forced_voting_weight: Option<i64>) -> User {
    let mut conn = db.acquire().await.unwrap();
    UserRepository::insert(
        &mut conn,
        &NewUser {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            role: UserRole::User,
            forced_voting_weight,
        },
    )
    .await
    .unwrap()
}

pub async fn topic(db: &Database, title: &str) -> Topic {
    let mut conn = db.acquire().await.unwrap();
    TopicRepository::insert(
        &mut conn,
        &NewTopic {
            title: title.to_string(),
            description: format!("All about {}", title),
            created_by: None,
        },
    )
    .await
    .unwrap()
}

pub async fn report(db: &Database, topic_id: i64, title: &str, severity: Severity) -> Report {
    let mut conn = db.acquire().await.unwrap();
    ReportRepository::insert(
        &mut conn,
        &NewReport {
            topic_id,
            title: title.to_string(),
            report_type: ReportType::Bug,
            severity,
            version: Some("1.0".to_string()),
            created_by: None,
        },
    )
    .await
    .unwrap()
}

pub async fn post(db: &Database, report_id: i64, content: &str, created_by: Option<i64>) -> Post {
    let mut conn = db.acquire().await.unwrap();
    PostRepository::insert(
        &mut conn,
        &NewPost {
            report_id,
            content: content.to_string(),
            created_by,
        },
    )
    .await
    .unwrap()
}

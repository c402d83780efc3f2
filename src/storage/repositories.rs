//! Hand-written SQL gateways, one per entity.
//!
//! Every operation takes a connection so callers decide whether it runs on
//! a plain pooled connection or inside [`Database::transaction`].
//!
//! [`Database::transaction`]: crate::storage::database::Database::transaction

use chrono::Utc;
use sqlx::sqlite::SqliteConnection;

use crate::core::error::{AppError, AppResult};
use crate::core::types::{
    Attachment, Configuration, NewAttachment, NewPost, NewReport, NewTopic, NewUser,
    Organization, Post, Report, Topic, User,
};
use crate::pagination::PageRequest;

/// Builds an `ORDER BY` clause from a whitelisted sort key. Unknown keys
/// fall back to `default`; `id` breaks ties so slices are stable.
fn order_by(columns: &[(&str, &str)], request: &PageRequest, default: &str) -> String {
    let expression = request
        .sort_by
        .as_deref()
        .and_then(|key| columns.iter().find(|(name, _)| *name == key))
        .map(|(_, expression)| *expression)
        .unwrap_or(default);
    let direction = if request.ascending { "ASC" } else { "DESC" };
    format!("ORDER BY {expression} {direction}, id {direction}")
}

fn limit_offset(request: &PageRequest) -> AppResult<(i64, i64)> {
    let offset = i64::try_from(request.offset)
        .map_err(|_| AppError::InvalidRequest("Page offset too large".to_string()))?;
    Ok((i64::from(request.limit), offset))
}

pub struct UserRepository;

impl UserRepository {
    pub async fn insert(conn: &mut SqliteConnection, user: &NewUser) -> AppResult<User> {
        let id = sqlx::query(
            "INSERT INTO users (username, email, role, forced_voting_weight, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role)
        .bind(user.forced_voting_weight)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        Self::find(conn, id).await
    }

    pub async fn find(conn: &mut SqliteConnection, id: i64) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, role, forced_voting_weight, biography, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {id} not found")))
    }
}

const TOPIC_COLUMNS: &str = r#"
    SELECT t.id, t.title, t.description, t.created_by, t.created_at,
           MAX(
               t.created_at,
               COALESCE((SELECT MAX(r.last_modified_at) FROM reports r WHERE r.topic_id = t.id), t.created_at),
               COALESCE((SELECT MAX(p.created_at) FROM posts p JOIN reports r ON p.report_id = r.id
                         WHERE r.topic_id = t.id), t.created_at)
           ) AS last_activity_at
    FROM topics t
"#;

pub struct TopicRepository;

impl TopicRepository {
    pub const SORT_COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("title", "t.title"),
        ("created_at", "t.created_at"),
        ("last_activity", "last_activity_at"),
    ];

    pub async fn insert(conn: &mut SqliteConnection, topic: &NewTopic) -> AppResult<Topic> {
        let id = sqlx::query("INSERT INTO topics (title, description, created_by, created_at) VALUES (?, ?, ?, ?)")
            .bind(&topic.title)
            .bind(&topic.description)
            .bind(topic.created_by)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

        Self::find(conn, id).await
    }

    pub async fn find(conn: &mut SqliteConnection, id: i64) -> AppResult<Topic> {
        sqlx::query_as::<_, Topic>(&format!("{TOPIC_COLUMNS} WHERE t.id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Topic {id} not found")))
    }

    pub async fn count(conn: &mut SqliteConnection) -> AppResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM topics")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn page(conn: &mut SqliteConnection, request: &PageRequest) -> AppResult<Vec<Topic>> {
        let (limit, offset) = limit_offset(request)?;
        let sql = format!(
            "{TOPIC_COLUMNS} {} LIMIT ? OFFSET ?",
            order_by(Self::SORT_COLUMNS, request, "t.title")
        );
        let topics = sqlx::query_as::<_, Topic>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;
        Ok(topics)
    }
}

const REPORT_COLUMNS: &str = r#"
    SELECT id, topic_id, title, report_type, severity, version, created_by, created_at,
           last_modified_at, closed_at, duplicate_of, relevance, relevance_override
    FROM reports
"#;

/// Row used to weigh a single vote.
#[derive(Debug, sqlx::FromRow)]
pub struct VoteWeightRow {
    pub upvote: bool,
    pub forced_voting_weight: Option<i64>,
    pub post_count: i64,
}

pub struct ReportRepository;

impl ReportRepository {
    pub const SORT_COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("title", "title"),
        ("created_at", "created_at"),
        ("last_modified_at", "last_modified_at"),
        ("relevance", "COALESCE(relevance_override, relevance)"),
        (
            "severity",
            "CASE severity WHEN 'minor' THEN 0 WHEN 'relevant' THEN 1 ELSE 2 END",
        ),
        ("type", "report_type"),
    ];

    pub async fn insert(conn: &mut SqliteConnection, report: &NewReport) -> AppResult<Report> {
        let now = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO reports (topic_id, title, report_type, severity, version, created_by, created_at, last_modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.topic_id)
        .bind(&report.title)
        .bind(report.report_type)
        .bind(report.severity)
        .bind(&report.version)
        .bind(report.created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        Self::find(conn, id).await
    }

    pub async fn find(conn: &mut SqliteConnection, id: i64) -> AppResult<Report> {
        sqlx::query_as::<_, Report>(&format!("{REPORT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Report {id} not found")))
    }

    pub async fn count_in_topic(conn: &mut SqliteConnection, topic_id: i64) -> AppResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reports WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn page_in_topic(
        conn: &mut SqliteConnection,
        topic_id: i64,
        request: &PageRequest,
    ) -> AppResult<Vec<Report>> {
        let (limit, offset) = limit_offset(request)?;
        let sql = format!(
            "{REPORT_COLUMNS} WHERE topic_id = ? {} LIMIT ? OFFSET ?",
            order_by(Self::SORT_COLUMNS, request, "last_modified_at")
        );
        let reports = sqlx::query_as::<_, Report>(&sql)
            .bind(topic_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;
        Ok(reports)
    }

    pub async fn vote_weights(conn: &mut SqliteConnection, report_id: i64) -> AppResult<Vec<VoteWeightRow>> {
        let rows = sqlx::query_as::<_, VoteWeightRow>(
            r#"
            SELECT v.upvote, u.forced_voting_weight,
                   (SELECT COUNT(*) FROM posts p WHERE p.created_by = u.id) AS post_count
            FROM votes v
            JOIN users u ON u.id = v.user_id
            WHERE v.report_id = ?
            "#,
        )
        .bind(report_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn store_relevance(conn: &mut SqliteConnection, report_id: i64, relevance: i64) -> AppResult<()> {
        sqlx::query("UPDATE reports SET relevance = ? WHERE id = ?")
            .bind(relevance)
            .bind(report_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn set_relevance_override(
        conn: &mut SqliteConnection,
        report_id: i64,
        relevance_override: Option<i64>,
    ) -> AppResult<()> {
        let result = sqlx::query("UPDATE reports SET relevance_override = ? WHERE id = ?")
            .bind(relevance_override)
            .bind(report_id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Report {report_id} not found")));
        }
        Ok(())
    }
}

pub struct VoteRepository;

impl VoteRepository {
    /// Record a user's vote, replacing an earlier one on the same report.
    pub async fn upsert(conn: &mut SqliteConnection, user_id: i64, report_id: i64, upvote: bool) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO votes (user_id, report_id, upvote) VALUES (?, ?, ?)
            ON CONFLICT (user_id, report_id) DO UPDATE SET upvote = excluded.upvote
            "#,
        )
        .bind(user_id)
        .bind(report_id)
        .bind(upvote)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

const POST_COLUMNS: &str = r#"
    SELECT id, report_id, content, created_by, created_at, last_modified_at FROM posts
"#;

pub struct PostRepository;

impl PostRepository {
    pub const SORT_COLUMNS: &'static [(&'static str, &'static str)] = &[("created_at", "created_at")];

    pub async fn insert(conn: &mut SqliteConnection, post: &NewPost) -> AppResult<Post> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO posts (report_id, content, created_by, created_at, last_modified_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(post.report_id)
        .bind(&post.content)
        .bind(post.created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        // A new post counts as activity on its report.
        sqlx::query("UPDATE reports SET last_modified_at = ? WHERE id = ?")
            .bind(now)
            .bind(post.report_id)
            .execute(&mut *conn)
            .await?;

        Self::find(conn, id).await
    }

    pub async fn find(conn: &mut SqliteConnection, id: i64) -> AppResult<Post> {
        sqlx::query_as::<_, Post>(&format!("{POST_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {id} not found")))
    }

    pub async fn count_in_report(conn: &mut SqliteConnection, report_id: i64) -> AppResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE report_id = ?")
            .bind(report_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn page_in_report(
        conn: &mut SqliteConnection,
        report_id: i64,
        request: &PageRequest,
    ) -> AppResult<Vec<Post>> {
        let (limit, offset) = limit_offset(request)?;
        let sql = format!(
            "{POST_COLUMNS} WHERE report_id = ? {} LIMIT ? OFFSET ?",
            order_by(Self::SORT_COLUMNS, request, "created_at")
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(report_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;
        Ok(posts)
    }
}

pub struct AttachmentRepository;

impl AttachmentRepository {
    pub async fn insert(conn: &mut SqliteConnection, attachment: &NewAttachment) -> AppResult<Attachment> {
        let id = sqlx::query("INSERT INTO attachments (post_id, name, mime_type, content) VALUES (?, ?, ?, ?)")
            .bind(attachment.post_id)
            .bind(&attachment.name)
            .bind(&attachment.mime_type)
            .bind(&attachment.content)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

        Ok(Attachment {
            id,
            post_id: attachment.post_id,
            name: attachment.name.clone(),
            mime_type: attachment.mime_type.clone(),
            content: attachment.content.clone(),
        })
    }

    pub async fn count_for_post(conn: &mut SqliteConnection, post_id: i64) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM attachments WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    pub async fn for_post(conn: &mut SqliteConnection, post_id: i64) -> AppResult<Vec<Attachment>> {
        let attachments = sqlx::query_as::<_, Attachment>(
            "SELECT id, post_id, name, mime_type, content FROM attachments WHERE post_id = ? ORDER BY id",
        )
        .bind(post_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(attachments)
    }
}

pub struct ConfigurationRepository;

impl ConfigurationRepository {
    pub async fn load(conn: &mut SqliteConnection) -> AppResult<Configuration> {
        sqlx::query_as::<_, Configuration>(
            r#"
            SELECT guest_reading, user_registration, closed_report_posting,
                   voting_weight_definition, allowed_extensions, max_attachments_per_post
            FROM configuration WHERE id = 1
            "#,
        )
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::Internal("Configuration row missing".to_string()))
    }

    pub async fn load_organization(conn: &mut SqliteConnection) -> AppResult<Organization> {
        sqlx::query_as::<_, Organization>("SELECT name, footer, support_email FROM organization WHERE id = 1")
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::Internal("Organization row missing".to_string()))
    }

    pub async fn set_voting_weight_definition(conn: &mut SqliteConnection, definition: &str) -> AppResult<()> {
        sqlx::query("UPDATE configuration SET voting_weight_definition = ? WHERE id = 1")
            .bind(definition)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

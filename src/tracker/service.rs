use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::error::{AppError, AppResult};
use crate::core::types::{
    Attachment, Configuration, NewAttachment, Post, Report, Selection, Topic,
};
use crate::pagination::{Page, PageRequest, PageSource, Paginator};
use crate::storage::database::Database;
use crate::storage::repositories::{
    AttachmentRepository, ConfigurationRepository, PostRepository, ReportRepository,
    TopicRepository, UserRepository, VoteRepository,
};
use crate::tracker::relevance::{computed_relevance, VotingWeightDefinition, WeightedVote};

fn sort_keys(columns: &[(&'static str, &'static str)]) -> Vec<&'static str> {
    columns.iter().map(|(key, _)| *key).collect()
}

pub struct TopicSource {
    db: Arc<Database>,
    columns: Vec<&'static str>,
}

impl TopicSource {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            columns: sort_keys(TopicRepository::SORT_COLUMNS),
        }
    }
}

#[async_trait]
impl PageSource for TopicSource {
    type Item = Topic;

    fn sortable_columns(&self) -> &[&'static str] {
        &self.columns
    }

    async fn total_size(&self) -> AppResult<u64> {
        let mut conn = self.db.acquire().await?;
        TopicRepository::count(&mut conn).await
    }

    async fn fetch(&self, request: &PageRequest) -> AppResult<Vec<Topic>> {
        let mut conn = self.db.acquire().await?;
        TopicRepository::page(&mut conn, request).await
    }
}

pub struct ReportSource {
    db: Arc<Database>,
    topic_id: i64,
    columns: Vec<&'static str>,
}

impl ReportSource {
    pub fn new(db: Arc<Database>, topic_id: i64) -> Self {
        Self {
            db,
            topic_id,
            columns: sort_keys(ReportRepository::SORT_COLUMNS),
        }
    }
}

#[async_trait]
impl PageSource for ReportSource {
    type Item = Report;

    fn sortable_columns(&self) -> &[&'static str] {
        &self.columns
    }

    async fn total_size(&self) -> AppResult<u64> {
        let mut conn = self.db.acquire().await?;
        ReportRepository::count_in_topic(&mut conn, self.topic_id).await
    }

    async fn fetch(&self, request: &PageRequest) -> AppResult<Vec<Report>> {
        let mut conn = self.db.acquire().await?;
        ReportRepository::page_in_topic(&mut conn, self.topic_id, request).await
    }
}

/// A post together with its attachments.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PostWithAttachments {
    #[serde(flatten)]
    pub post: Post,
    pub attachments: Vec<Attachment>,
}

pub struct PostSource {
    db: Arc<Database>,
    report_id: i64,
    columns: Vec<&'static str>,
}

impl PostSource {
    pub fn new(db: Arc<Database>, report_id: i64) -> Self {
        Self {
            db,
            report_id,
            columns: sort_keys(PostRepository::SORT_COLUMNS),
        }
    }
}

#[async_trait]
impl PageSource for PostSource {
    type Item = PostWithAttachments;

    fn sortable_columns(&self) -> &[&'static str] {
        &self.columns
    }

    async fn total_size(&self) -> AppResult<u64> {
        let mut conn = self.db.acquire().await?;
        PostRepository::count_in_report(&mut conn, self.report_id).await
    }

    async fn fetch(&self, request: &PageRequest) -> AppResult<Vec<PostWithAttachments>> {
        let mut conn = self.db.acquire().await?;
        let posts = PostRepository::page_in_report(&mut conn, self.report_id, request).await?;

        let mut items = Vec::with_capacity(posts.len());
        for post in posts {
            let attachments = AttachmentRepository::for_post(&mut conn, post.id).await?;
            items.push(PostWithAttachments { post, attachments });
        }
        Ok(items)
    }
}

pub struct TrackerService {
    db: Arc<Database>,
    max_page_size: u32,
}

impl TrackerService {
    pub fn new(db: Arc<Database>, max_page_size: u32) -> Self {
        Self { db, max_page_size }
    }

    pub async fn topics(&self, selection: Selection) -> AppResult<Page<Topic>> {
        let source = TopicSource::new(Arc::clone(&self.db));
        Paginator::new(source, selection, self.max_page_size)?.update().await
    }

    pub async fn topic(&self, topic_id: i64) -> AppResult<Topic> {
        let mut conn = self.db.acquire().await?;
        TopicRepository::find(&mut conn, topic_id).await
    }

    /// Reports of a topic. Fails with `NotFound` for an unknown topic.
    pub async fn reports(&self, topic_id: i64, selection: Selection) -> AppResult<Page<Report>> {
        self.topic(topic_id).await?;
        let source = ReportSource::new(Arc::clone(&self.db), topic_id);
        Paginator::new(source, selection, self.max_page_size)?.update().await
    }

    pub async fn report(&self, report_id: i64) -> AppResult<Report> {
        let mut conn = self.db.acquire().await?;
        ReportRepository::find(&mut conn, report_id).await
    }

    pub async fn posts(&self, report_id: i64, selection: Selection) -> AppResult<Page<PostWithAttachments>> {
        self.report(report_id).await?;
        let source = PostSource::new(Arc::clone(&self.db), report_id);
        Paginator::new(source, selection, self.max_page_size)?.update().await
    }

    pub async fn configuration(&self) -> AppResult<Configuration> {
        let mut conn = self.db.acquire().await?;
        ConfigurationRepository::load(&mut conn).await
    }

    /// Record a vote and refresh the report's cached relevance atomically.
    /// Returns the report as stored afterwards.
    pub async fn cast_vote(&self, user_id: i64, report_id: i64, upvote: bool) -> AppResult<Report> {
        let report = self
            .db
            .transaction(move |conn| {
                Box::pin(async move {
                    UserRepository::find(conn, user_id).await?;
                    ReportRepository::find(conn, report_id).await?;
                    VoteRepository::upsert(conn, user_id, report_id, upvote).await?;
                    let relevance = refresh_relevance(conn, report_id).await?;
                    debug!(report_id, relevance, "Relevance recomputed");
                    ReportRepository::find(conn, report_id).await
                })
            })
            .await?;

        info!(user_id, report_id, upvote, "Vote recorded");
        Ok(report)
    }

    /// Store an attachment on a post, enforcing the allowed extensions and
    /// the per-post limit.
    pub async fn attach(&self, attachment: NewAttachment) -> AppResult<Attachment> {
        self.db
            .transaction(move |conn| {
                Box::pin(async move {
                    let configuration = ConfigurationRepository::load(conn).await?;
                    if !configuration.accepts_extension(&attachment.name) {
                        return Err(AppError::InvalidRequest(format!(
                            "File type of '{}' is not allowed",
                            attachment.name
                        )));
                    }

                    PostRepository::find(conn, attachment.post_id).await?;
                    let existing = AttachmentRepository::count_for_post(conn, attachment.post_id).await?;
                    if existing >= configuration.max_attachments_per_post {
                        return Err(AppError::InvalidRequest(format!(
                            "A post may carry at most {} attachments",
                            configuration.max_attachments_per_post
                        )));
                    }

                    AttachmentRepository::insert(conn, &attachment).await
                })
            })
            .await
    }

    /// Change the voting weight definition and recompute every report's
    /// relevance with it.
    pub async fn update_voting_weights(&self, definition: VotingWeightDefinition) -> AppResult<usize> {
        let rendered = definition.to_string();
        self.db
            .transaction(move |conn| {
                Box::pin(async move {
                    ConfigurationRepository::set_voting_weight_definition(conn, &rendered).await?;
                    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM reports")
                        .fetch_all(&mut *conn)
                        .await?;
                    for id in &ids {
                        refresh_relevance(conn, *id).await?;
                    }
                    Ok(ids.len())
                })
            })
            .await
    }
}

async fn refresh_relevance(conn: &mut sqlx::SqliteConnection, report_id: i64) -> AppResult<i64> {
    let configuration = ConfigurationRepository::load(conn).await?;
    let definition: VotingWeightDefinition = configuration.voting_weight_definition.parse()?;

    let votes: Vec<WeightedVote> = ReportRepository::vote_weights(conn, report_id)
        .await?
        .into_iter()
        .map(|row| WeightedVote {
            upvote: row.upvote,
            voter_post_count: row.post_count.max(0) as u64,
            voter_forced_weight: row.forced_voting_weight,
        })
        .collect();

    let relevance = computed_relevance(&definition, &votes);
    ReportRepository::store_relevance(conn, report_id, relevance).await?;
    Ok(relevance)
}

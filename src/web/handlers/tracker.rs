use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::app::AppState;
use crate::core::error::{AppError, AppResult};
use crate::core::types::{Report, Selection, Topic};
use crate::pagination::Page;
use crate::tracker::service::PostWithAttachments;

#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort: Option<String>,
    pub asc: Option<bool>,
}

impl PaginationQuery {
    fn into_selection(self, default_page_size: u32) -> Selection {
        Selection {
            page_size: self.size.unwrap_or(default_page_size),
            current_page: self.page.unwrap_or(0),
            sorted_by: self.sort.filter(|column| !column.is_empty()),
            ascending: self.asc.unwrap_or(true),
        }
    }
}

fn parse_id(raw: &str, what: &str) -> AppResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| AppError::InvalidRequest(format!("Invalid {} ID", what)))
}

pub async fn list_topics(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationQuery>,
) -> AppResult<Json<Page<Topic>>> {
    let selection = pagination.into_selection(state.config.pagination.default_page_size);
    let page = state.tracker_service.topics(selection).await?;
    Ok(Json(page))
}

pub async fn get_topic(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
) -> AppResult<Json<Topic>> {
    let topic_id = parse_id(&topic_id, "topic")?;
    Ok(Json(state.tracker_service.topic(topic_id).await?))
}

pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
    Query(pagination): Query<PaginationQuery>,
) -> AppResult<Json<Page<Report>>> {
    let topic_id = parse_id(&topic_id, "topic")?;
    let selection = pagination.into_selection(state.config.pagination.default_page_size);
    let page = state.tracker_service.reports(topic_id, selection).await?;
    Ok(Json(page))
}

pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> AppResult<Json<Report>> {
    let report_id = parse_id(&report_id, "report")?;
    Ok(Json(state.tracker_service.report(report_id).await?))
}

pub async fn list_posts(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
    Query(pagination): Query<PaginationQuery>,
) -> AppResult<Json<Page<PostWithAttachments>>> {
    let report_id = parse_id(&report_id, "report")?;
    let selection = pagination.into_selection(state.config.pagination.default_page_size);
    let page = state.tracker_service.posts(report_id, selection).await?;
    Ok(Json(page))
}

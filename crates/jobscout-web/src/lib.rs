//! Read-only web view over recently discovered jobs.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use jobscout_core::PersistedJob;
use jobscout_storage::JobStore;
use jobscout_sync::recently_discovered;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "jobscout-web";

const MAX_WINDOW_DAYS: u32 = 365;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub default_days: u32,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, default_days: u32) -> Self {
        Self {
            store,
            default_days,
        }
    }

    fn window(&self, query: &RecentQuery) -> u32 {
        query.days.unwrap_or(self.default_days).min(MAX_WINDOW_DAYS)
    }
}

#[derive(Debug, Deserialize, Default)]
struct RecentQuery {
    days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRow {
    pub title: String,
    pub company: String,
    pub description: String,
    pub url: String,
    pub search_rank: u32,
    pub discovered_at: String,
}

impl From<PersistedJob> for JobRow {
    fn from(job: PersistedJob) -> Self {
        Self {
            title: if job.title.is_empty() {
                "(untitled)".to_string()
            } else {
                job.title
            },
            company: job.company,
            description: job.description,
            url: job.url,
            search_rank: job.search_rank,
            discovered_at: job.discovered_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RecentJobsBody {
    days: u32,
    count: usize,
    jobs: Vec<PersistedJob>,
}

#[derive(Template)]
#[template(path = "jobs.html")]
struct JobsTemplate {
    days: u32,
    count: usize,
    jobs: Vec<JobRow>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/jobs/recent", get(recent_jobs_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web ui listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let days = state.window(&query);
    match recently_discovered(state.store.as_ref(), days).await {
        Ok(jobs) => render_html(JobsTemplate {
            days,
            count: jobs.len(),
            jobs: jobs.into_iter().map(JobRow::from).collect(),
        }),
        Err(err) => server_error(err.into()),
    }
}

async fn recent_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let days = state.window(&query);
    match recently_discovered(state.store.as_ref(), days).await {
        Ok(jobs) => Json(RecentJobsBody {
            days,
            count: jobs.len(),
            jobs,
        })
        .into_response(),
        Err(err) => {
            error!(error = %err, "loading recent jobs failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::{Duration, Utc};
    use http_body_util::BodyExt;
    use jobscout_core::{url_hash, JobRecord};
    use jobscout_storage::MemoryJobStore;
    use tower::ServiceExt;

    async fn seeded_store() -> MemoryJobStore {
        let store = MemoryJobStore::new();
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();
        let mut fresh = JobRecord::new("https://jobs.ashbyhq.com/acme/1").with_title("Frontend <Engineer>");
        fresh.company = "Acme".to_string();
        fresh.description = "Remote, US".to_string();
        tx.insert_job(&fresh, &url_hash(&fresh.url).unwrap(), now - Duration::hours(2))
            .await
            .unwrap();
        let old = JobRecord::new("https://jobs.ashbyhq.com/globex/2").with_title("Designer");
        tx.insert_job(&old, &url_hash(&old.url).unwrap(), now - Duration::days(5))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        store
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn index_lists_recent_jobs_escaped() {
        let app = app(AppState::new(Arc::new(seeded_store().await), 1));
        let (status, text) = get(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("1 job(s) discovered in the last 1 day(s)"));
        assert!(text.contains("Frontend &lt;Engineer&gt;"));
        assert!(!text.contains("Designer"));
    }

    #[tokio::test]
    async fn index_window_follows_query() {
        let app = app(AppState::new(Arc::new(seeded_store().await), 1));
        let (_, text) = get(app, "/?days=7").await;
        assert!(text.contains("2 job(s) discovered in the last 7 day(s)"));
        assert!(text.contains("Designer"));
    }

    #[tokio::test]
    async fn recent_api_returns_json() {
        let app = app(AppState::new(Arc::new(seeded_store().await), 1));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/recent?days=7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "application/json"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["days"], 7);
        assert_eq!(value["count"], 2);
        assert_eq!(value["jobs"][0]["company"], "Acme");
    }

    #[tokio::test]
    async fn empty_store_renders_placeholder() {
        let app = app(AppState::new(Arc::new(MemoryJobStore::new()), 1));
        let (status, text) = get(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("No new jobs."));
    }
}

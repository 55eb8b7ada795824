//! Page driver contract plus the snapshot and HTTP drivers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jobscout_core::AnchorDescriptor;
use jobscout_storage::{FetchError, HttpFetcher, PageArchive};
use thiserror::Error;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::html::{parse_anchors, parse_results_page};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("fetching page {page_index}: {source}")]
    Fetch {
        page_index: usize,
        #[source]
        source: FetchError,
    },
    #[error("reading snapshot {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("markup selector: {0}")]
    Markup(String),
    #[error("first result page did not load within {timeout:?}")]
    FirstPageTimedOut { timeout: Duration },
}

/// What a single readiness check on a page returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePoll {
    Ready(Vec<AnchorDescriptor>),
    Pending,
    NoSuchPage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFetch {
    Anchors(Vec<AnchorDescriptor>),
    EndOfPages,
}

#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[async_trait]
pub trait PageDriver: Send {
    /// One non-blocking readiness check for the page at `page_index` (0-based).
    async fn poll_page(&mut self, page_index: usize) -> Result<PagePoll, DriverError>;

    /// Waits for the page within `policy`. A missing page ends pagination, as does
    /// a timeout on any page after the first; a first page that never loads is an error.
    async fn fetch_page(
        &mut self,
        page_index: usize,
        policy: WaitPolicy,
    ) -> Result<PageFetch, DriverError> {
        match wait_for_page(self, page_index, policy).await? {
            WaitOutcome::Ready(anchors) => Ok(PageFetch::Anchors(anchors)),
            WaitOutcome::NotFound => {
                info!(page = page_index + 1, "no more pages");
                Ok(PageFetch::EndOfPages)
            }
            WaitOutcome::TimedOut if page_index == 0 => Err(DriverError::FirstPageTimedOut {
                timeout: policy.timeout,
            }),
            WaitOutcome::TimedOut => {
                info!(page = page_index + 1, timeout = ?policy.timeout, "timed out waiting for page");
                Ok(PageFetch::EndOfPages)
            }
        }
    }
}

/// Polls `driver` until the page is ready, reported missing, or `policy.timeout` elapses.
pub async fn wait_for_page<D: PageDriver + ?Sized>(
    driver: &mut D,
    page_index: usize,
    policy: WaitPolicy,
) -> Result<WaitOutcome<Vec<AnchorDescriptor>>, DriverError> {
    let deadline = Instant::now() + policy.timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(WaitOutcome::TimedOut);
        }
        let poll = match tokio::time::timeout(remaining, driver.poll_page(page_index)).await {
            Ok(poll) => poll?,
            Err(_) => return Ok(WaitOutcome::TimedOut),
        };
        match poll {
            PagePoll::Ready(anchors) => return Ok(WaitOutcome::Ready(anchors)),
            PagePoll::NoSuchPage => return Ok(WaitOutcome::NotFound),
            PagePoll::Pending => {
                tokio::time::sleep(policy.poll_interval.min(remaining)).await;
            }
        }
    }
}

/// Replays rendered result pages saved as `page-1.html`, `page-2.html`, ...
#[derive(Debug, Clone)]
pub struct HtmlSnapshotDriver {
    dir: PathBuf,
}

impl HtmlSnapshotDriver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn page_path(&self, page_index: usize) -> PathBuf {
        self.dir.join(format!("page-{}.html", page_index + 1))
    }
}

#[async_trait]
impl PageDriver for HtmlSnapshotDriver {
    async fn poll_page(&mut self, page_index: usize) -> Result<PagePoll, DriverError> {
        let path = self.page_path(page_index);
        let html = match fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(PagePoll::NoSuchPage),
            Err(source) => return Err(DriverError::Snapshot { path, source }),
        };
        let anchors = parse_anchors(&html)?;
        debug!(path = %path.display(), anchors = anchors.len(), "loaded snapshot page");
        Ok(PagePoll::Ready(anchors))
    }
}

/// `<base>?q=<query>` for the first page, with `&start=<offset>` after that.
pub fn search_page_url(base_url: &str, query: &str, page_index: usize, results_per_page: usize) -> String {
    let encoded = urlencoding::encode(query);
    if page_index == 0 {
        format!("{base_url}?q={encoded}")
    } else {
        format!("{base_url}?q={encoded}&start={}", page_index * results_per_page)
    }
}

/// Fetches already-rendered result pages over HTTP and archives every raw page.
#[derive(Debug)]
pub struct HttpSearchDriver {
    fetcher: Arc<HttpFetcher>,
    archive: Option<PageArchive>,
    run_id: Uuid,
    base_url: String,
    query: String,
    results_per_page: usize,
    next_page_linked: bool,
}

impl HttpSearchDriver {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        run_id: Uuid,
        base_url: impl Into<String>,
        query: impl Into<String>,
        results_per_page: usize,
    ) -> Self {
        Self {
            fetcher,
            archive: None,
            run_id,
            base_url: base_url.into(),
            query: query.into(),
            results_per_page: results_per_page.max(1),
            next_page_linked: true,
        }
    }

    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }
}

#[async_trait]
impl PageDriver for HttpSearchDriver {
    async fn poll_page(&mut self, page_index: usize) -> Result<PagePoll, DriverError> {
        if page_index > 0 && !self.next_page_linked {
            return Ok(PagePoll::NoSuchPage);
        }

        let url = search_page_url(&self.base_url, &self.query, page_index, self.results_per_page);
        let response = self
            .fetcher
            .fetch_bytes(self.run_id, &url)
            .await
            .map_err(|source| DriverError::Fetch { page_index, source })?;

        if let Some(archive) = &self.archive {
            match archive
                .archive_page(Utc::now(), self.run_id, page_index, &response.body)
                .await
            {
                Ok(saved) => debug!(path = %saved.absolute_path.display(), "archived result page"),
                Err(err) => warn!(error = %err, "could not archive result page"),
            }
        }

        let html = String::from_utf8_lossy(&response.body);
        let (anchors, has_next) = parse_results_page(&html)?;
        self.next_page_linked = has_next;
        info!(
            page = page_index + 1,
            url = %response.final_url,
            anchors = anchors.len(),
            has_next,
            "fetched result page"
        );
        Ok(PagePoll::Ready(anchors))
    }
}

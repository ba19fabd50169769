//! Scan cycle orchestration: extract, filter against history, notify, persist.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobwatch_adapters::{adapter_for_source, FetchedPage, ListingAdapter, ListingTarget, UPWORK_SOURCE_ID};
use jobwatch_core::JobRecord;
use jobwatch_notify::{
    LogNotifier, Notifier, NotifierConfig, SmtpNotifier, UnavailableNotifier, DEFAULT_SMTP_HOST,
    DEFAULT_SMTP_PORT, DEFAULT_SUBJECT,
};
use jobwatch_storage::{CsvJobStore, HttpClientConfig, HttpFetcher, JobStore, DEFAULT_STORE_FILE};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobwatch-sync";

pub const DEFAULT_SEARCH_URL: &str = "https://www.upwork.com/nx/search/jobs/?amount=100-&hourly_rate=10-&payment_verified=1&per_page=20&proposals=0-4,5-9,10-14,15-19&q=web%20scraping%20python&sort=recency&t=0,1";

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Scraped records whose comparison key is absent from `store`, in scrape
/// order. Duplicates inside `scraped` are not collapsed here.
pub fn filter_new(scraped: &[JobRecord], store: &JobStore) -> Vec<JobRecord> {
    let known = store.keys();
    scraped
        .iter()
        .filter(|record| !known.contains(&record.comparison_key()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub search_url: String,
    pub store_path: PathBuf,
    pub source_id: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub notifier: Option<NotifierConfig>,
}

impl ScanConfig {
    pub fn from_env() -> Self {
        Self {
            search_url: std::env::var("JOBWATCH_SEARCH_URL")
                .unwrap_or_else(|_| DEFAULT_SEARCH_URL.to_string()),
            store_path: std::env::var("JOBWATCH_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_FILE)),
            source_id: std::env::var("JOBWATCH_SOURCE")
                .unwrap_or_else(|_| UPWORK_SOURCE_ID.to_string()),
            user_agent: std::env::var("JOBWATCH_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: std::env::var("JOBWATCH_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            notifier: notifier_config_from_env(),
        }
    }
}

/// Email is enabled only when sender, receiver and password are all present.
fn notifier_config_from_env() -> Option<NotifierConfig> {
    let sender = non_empty_var("SENDER_EMAIL")?;
    let receiver = non_empty_var("RECEIVER_EMAIL")?;
    let password = non_empty_var("EMAIL_PASSWORD")?;
    Some(NotifierConfig {
        sender,
        receiver,
        password,
        subject: non_empty_var("EMAIL_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        smtp_host: non_empty_var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
        smtp_port: non_empty_var("SMTP_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SMTP_PORT),
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Where the search page comes from for one cycle.
#[derive(Debug, Clone)]
pub enum PageInput {
    Fetch,
    HtmlFile(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scraped: usize,
    pub new: usize,
    pub stored_total: usize,
    pub notified: bool,
}

pub struct ScanPipeline {
    config: ScanConfig,
    adapter: Box<dyn ListingAdapter>,
    http: HttpFetcher,
    store: CsvJobStore,
    notifier: Box<dyn Notifier>,
}

impl ScanPipeline {
    pub fn new(config: ScanConfig) -> Result<Self> {
        let adapter = adapter_for_source(&config.source_id)
            .with_context(|| format!("no adapter registered for {}", config.source_id))?;
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        // A bad email setup must not stop the scan from persisting.
        let notifier: Box<dyn Notifier> = match &config.notifier {
            Some(notifier_config) => match SmtpNotifier::new(notifier_config.clone()) {
                Ok(smtp) => Box::new(smtp),
                Err(err) => {
                    warn!(error = %err, "email notifier unavailable; new jobs will not be mailed");
                    Box::new(UnavailableNotifier::new(&err))
                }
            },
            None => Box::new(LogNotifier),
        };
        let store = CsvJobStore::new(config.store_path.clone());
        Ok(Self {
            config,
            adapter,
            http,
            store,
            notifier,
        })
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &CsvJobStore {
        &self.store
    }

    pub async fn run_once(&self, input: PageInput) -> Result<ScanRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("scan", %run_id, source_id = self.adapter.source_id());
        self.run_cycle(run_id, input).instrument(span).await
    }

    async fn run_cycle(&self, run_id: Uuid, input: PageInput) -> Result<ScanRunSummary> {
        let started_at = Utc::now();

        let page = match input {
            PageInput::Fetch => {
                let target = ListingTarget {
                    url: self.config.search_url.clone(),
                };
                self.adapter.fetch_listing(&self.http, &target).await?
            }
            PageInput::HtmlFile(path) => FetchedPage::from_html_file(&path, &self.config.search_url)?,
        };

        let scraped = self.adapter.parse_listing(&page)?;
        if scraped.is_empty() {
            warn!(url = %page.url, "no job listings found on page");
        }

        let store = self.store.load().await;
        let new_jobs = filter_new(&scraped, &store);
        info!(
            scraped = scraped.len(),
            known = store.len(),
            new = new_jobs.len(),
            "compared scrape against job store"
        );

        if new_jobs.is_empty() {
            return Ok(ScanRunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                scraped: scraped.len(),
                new: 0,
                stored_total: store.len(),
                notified: false,
            });
        }

        let notified = match self.notifier.notify(&new_jobs).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "notification failed; persisting anyway");
                false
            }
        };

        let new = new_jobs.len();
        let store = self
            .store
            .persist_new(new_jobs, store)
            .await
            .context("persisting new jobs")?;

        Ok(ScanRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            scraped: scraped.len(),
            new,
            stored_total: store.len(),
            notified,
        })
    }
}

pub async fn run_scan_once_from_env(input: PageInput) -> Result<ScanRunSummary> {
    ScanPipeline::new(ScanConfig::from_env())?.run_once(input).await
}

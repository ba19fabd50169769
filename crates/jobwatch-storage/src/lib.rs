//! Durable listing history (CSV, atomic replace) + plain HTTP page fetch for jobwatch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use jobwatch_core::{ComparisonKey, JobRecord};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobwatch-storage";

pub const DEFAULT_STORE_FILE: &str = "job_listings.csv";

pub const STORE_HEADER: [&str; 4] = ["Job title", "Posted", "Payment info", "Link"];

/// Ordered listing history. No two records share a [`ComparisonKey`] once
/// any constructor or [`JobStore::append`] returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStore {
    records: Vec<JobRecord>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<JobRecord>) -> Self {
        Self {
            records: dedup_keep_first(records),
        }
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<JobRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> HashSet<ComparisonKey> {
        self.records.iter().map(JobRecord::comparison_key).collect()
    }

    pub fn contains_key(&self, key: &ComparisonKey) -> bool {
        self.records.iter().any(|r| &r.comparison_key() == key)
    }

    /// Concatenate `new_records` after the existing rows and drop later
    /// duplicates, so existing rows win collisions. Returns how many rows the
    /// store grew by.
    pub fn append(&mut self, new_records: Vec<JobRecord>) -> usize {
        if new_records.is_empty() {
            return 0;
        }
        let before = self.records.len();
        let mut combined = std::mem::take(&mut self.records);
        combined.extend(new_records);
        self.records = dedup_keep_first(combined);
        self.records.len() - before
    }
}

fn dedup_keep_first(records: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(record.comparison_key()))
        .collect()
}

/// CSV-backed persistence for a [`JobStore`]. Writes go through a temp file
/// in the same directory followed by a rename, so readers never observe a
/// half-written store.
#[derive(Debug, Clone)]
pub struct CsvJobStore {
    path: PathBuf,
}

impl CsvJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted history. A missing, unreadable or corrupt file
    /// yields an empty store; the scan should still run with everything new.
    pub async fn load(&self) -> JobStore {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no job store yet; starting empty");
                return JobStore::new();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "job store unreadable; treating as empty");
                return JobStore::new();
            }
        };

        match parse_csv(&bytes) {
            Ok(records) => JobStore::from_records(records),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "job store corrupt; treating as empty");
                JobStore::new()
            }
        }
    }

    /// Overwrite the persisted history with `store`.
    pub async fn save(&self, store: &JobStore) -> anyhow::Result<()> {
        let bytes = render_csv(store.records())?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating store directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp store file {}", temp_path.display()))?;
        if let Err(err) = write_and_sync(&mut file, &bytes).await {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| format!("writing temp store file {}", temp_path.display()));
        }
        drop(file);

        match fs::rename(&temp_path, &self.path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp store {} -> {}",
                        temp_path.display(),
                        self.path.display()
                    )
                })
            }
        }
    }

    /// Append `new_records` to `store`, deduplicate, and persist the result.
    /// An empty batch is a no-op and touches nothing on disk.
    pub async fn persist_new(
        &self,
        new_records: Vec<JobRecord>,
        mut store: JobStore,
    ) -> anyhow::Result<JobStore> {
        if new_records.is_empty() {
            return Ok(store);
        }
        let offered = new_records.len();
        let added = store.append(new_records);
        self.save(&store).await?;
        info!(
            path = %self.path.display(),
            offered,
            added,
            total = store.len(),
            "job store updated"
        );
        Ok(store)
    }
}

async fn write_and_sync(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

fn parse_csv(bytes: &[u8]) -> anyhow::Result<Vec<JobRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers = reader.headers().context("reading store header")?.clone();
    if headers.iter().ne(STORE_HEADER.iter().copied()) {
        return Err(anyhow!("unexpected store header: {:?}", headers));
    }
    reader
        .deserialize::<JobRecord>()
        .collect::<Result<Vec<_>, _>>()
        .context("parsing store rows")
}

fn render_csv(records: &[JobRecord]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(STORE_HEADER)
        .context("writing store header")?;
    for record in records {
        writer.serialize(record).context("serializing store row")?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow!("flushing store buffer: {}", err.error()))
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-attempt page fetcher. Pages that need a rendering browser are
/// captured elsewhere and handed in as files instead.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    #[tracing::instrument(name = "http_fetch", skip(self))]
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn job(title: &str, posted: &str, pay: &str, link: &str) -> JobRecord {
        JobRecord::new(title, posted, pay, link)
    }

    #[test]
    fn append_keeps_first_occurrence_on_collision() {
        let mut store = JobStore::from_records(vec![job("Rust Dev", "1 hour ago", "$10", "x")]);
        let added = store.append(vec![
            job("rust dev ", "3 hours ago", "$10", "x"),
            job("Go Dev", "now", "$20", "y"),
        ]);

        assert_eq!(added, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.records()[0].posted, "1 hour ago");
        assert_eq!(store.records()[1].title, "Go Dev");
    }

    #[test]
    fn append_collapses_internal_duplicates_of_the_batch() {
        let mut store = JobStore::new();
        let added = store.append(vec![
            job("a", "1 hour ago", "$10", "x"),
            job("A", "2 hours ago", "$10", "x"),
        ]);
        assert_eq!(added, 1);
        assert_eq!(store.records()[0].posted, "1 hour ago");
    }

    #[test]
    fn append_of_nothing_is_a_noop() {
        let mut store = JobStore::from_records(vec![job("a", "p", "m", "x")]);
        let before = store.clone();
        assert_eq!(store.append(Vec::new()), 0);
        assert_eq!(store, before);
    }

    #[test]
    fn from_records_enforces_unique_keys() {
        let store = JobStore::from_records(vec![
            job("a", "p1", "m", "x"),
            job("b", "p1", "m", "x"),
            job(" A", "p2", "M", "x"),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.keys().len(), store.len());
        assert!(store.contains_key(&job("A ", "later", " m", "x").comparison_key()));
        assert!(!store.contains_key(&job("a", "p1", "m", "X").comparison_key()));

        let posted: Vec<_> = store.into_records().into_iter().map(|r| r.posted).collect();
        assert_eq!(posted, vec!["p1", "p1"]);
    }

    #[tokio::test]
    async fn missing_store_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = CsvJobStore::new(dir.path().join("job_listings.csv"));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_store_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("job_listings.csv");
        std::fs::write(&path, "not,a,job,store,header\n\"unterminated").expect("write");
        let store = CsvJobStore::new(&path);
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn header_only_store_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("job_listings.csv");
        std::fs::write(&path, "Job title,Posted,Payment info,Link\n").expect("write");
        assert!(CsvJobStore::new(&path).load().await.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_preserves_quoting_and_order() {
        let dir = tempdir().expect("tempdir");
        let csv_store = CsvJobStore::new(dir.path().join("nested").join("job_listings.csv"));
        let store = JobStore::from_records(vec![
            job("Scraper, Python", "2 hours ago", "Hourly: $10-$20\nExpert", "https://www.upwork.com/jobs/1"),
            job("Data \"Entry\"", "yesterday", "Fixed price", "https://www.upwork.com/jobs/2"),
        ]);

        csv_store.save(&store).await.expect("save");
        let text = std::fs::read_to_string(csv_store.path()).expect("read");
        assert!(text.starts_with("Job title,Posted,Payment info,Link\n"));

        let loaded = csv_store.load().await;
        assert_eq!(loaded, store);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files_behind() {
        let dir = tempdir().expect("tempdir");
        let csv_store = CsvJobStore::new(dir.path().join("job_listings.csv"));
        csv_store
            .save(&JobStore::from_records(vec![job("a", "p", "m", "x")]))
            .await
            .expect("save");
        csv_store
            .save(&JobStore::from_records(vec![job("b", "p", "m", "y")]))
            .await
            .expect("save again");

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["job_listings.csv".to_string()]);
        assert_eq!(csv_store.load().await.records()[0].title, "b");
    }

    #[tokio::test]
    async fn persist_new_with_empty_batch_does_not_create_file() {
        let dir = tempdir().expect("tempdir");
        let csv_store = CsvJobStore::new(dir.path().join("job_listings.csv"));
        let store = csv_store
            .persist_new(Vec::new(), JobStore::new())
            .await
            .expect("persist");
        assert!(store.is_empty());
        assert!(!csv_store.path().exists());
    }

    #[tokio::test]
    async fn persist_new_writes_deduplicated_store() {
        let dir = tempdir().expect("tempdir");
        let csv_store = CsvJobStore::new(dir.path().join("job_listings.csv"));
        let store = csv_store
            .persist_new(
                vec![
                    job("a", "1 hour ago", "$10", "x"),
                    job("a", "2 hours ago", "$10", "x"),
                    job("b", "now", "$5", "y"),
                ],
                JobStore::new(),
            )
            .await
            .expect("persist");

        assert_eq!(store.len(), 2);
        assert_eq!(csv_store.load().await, store);
    }

    #[tokio::test]
    async fn save_fails_when_parent_is_a_file() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").expect("write");
        let csv_store = CsvJobStore::new(blocker.join("job_listings.csv"));
        let err = csv_store
            .save(&JobStore::from_records(vec![job("a", "p", "m", "x")]))
            .await
            .expect_err("parent is a regular file");
        assert!(err.to_string().contains("creating store directory"));
    }

    #[tokio::test]
    async fn failed_rename_keeps_existing_target_and_cleans_temp() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("job_listings.csv");
        std::fs::create_dir(&target).expect("mkdir");
        std::fs::write(target.join("keep.txt"), "existing").expect("write");

        let csv_store = CsvJobStore::new(&target);
        let err = csv_store
            .save(&JobStore::from_records(vec![job("a", "p", "m", "x")]))
            .await
            .expect_err("cannot rename a file over a non-empty directory");
        assert!(err.to_string().contains("atomically renaming temp store"));

        assert_eq!(
            std::fs::read_to_string(target.join("keep.txt")).expect("read"),
            "existing"
        );
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["job_listings.csv".to_string()]);
    }
}

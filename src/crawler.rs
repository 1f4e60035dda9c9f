//! Run orchestration: units of work in, CSV artifacts out.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::CrawlerConfig;
use crate::error::ExtractError;
use crate::features::FeatureClassifier;
use crate::models::expected_columns;
use crate::output::{BatchWriter, FlushOutcome};
use crate::progress::ProgressStore;
use crate::scrapers::{
    DelayRange, DetailExtractor, DetailSettings, PageCursor, PageFetcher, PaginationSettings,
    SearchPaginator, StopReason, UnitOfWork,
};

/// Label of the end-of-run flush for rows no unit managed to write.
pub const SALVAGE_LABEL: &str = "Error_Recovery";

/// Outcome of one unit of work.
#[derive(Debug, Clone, Default)]
pub struct UnitReport {
    pub url: String,
    pub label: String,
    pub pages: u32,
    pub extracted: usize,
    pub failed: usize,
    pub artifact: Option<PathBuf>,
    pub write_error: Option<String>,
}

impl UnitReport {
    fn new(unit: &UnitOfWork) -> Self {
        Self {
            url: unit.url().to_string(),
            label: unit.label().to_string(),
            ..Self::default()
        }
    }

    fn attempted(&self) -> usize {
        self.extracted + self.failed
    }
}

/// What a run produced.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub units: Vec<UnitReport>,
    /// Every artifact written, salvage included, in write order.
    pub artifacts: Vec<PathBuf>,
    pub deadline_reached: bool,
    /// Set when rows were left unwritten even after the salvage flush.
    pub unwritten_rows: usize,
}

impl RunSummary {
    pub fn extracted(&self) -> usize {
        self.units.iter().map(|u| u.extracted).sum()
    }

    pub fn failed(&self) -> usize {
        self.units.iter().map(|u| u.failed).sum()
    }
}

pub struct Crawler {
    paginator: SearchPaginator,
    extractor: DetailExtractor,
    writer: BatchWriter,
    expected_columns: Vec<String>,
    progress: ProgressStore,
    resume: bool,
    search_marker: String,
    listing_delay: DelayRange,
    inter_url_delay: DelayRange,
    max_run_time: Option<Duration>,
}

impl Crawler {
    pub fn new(
        config: &CrawlerConfig,
        fetcher: Arc<dyn PageFetcher>,
        classifier: Arc<FeatureClassifier>,
    ) -> Result<Self, ExtractError> {
        let performance = &config.performance;
        let paginator = SearchPaginator::new(
            Arc::clone(&fetcher),
            PaginationSettings {
                base_url: config.site.base_url.clone(),
                per_page_threshold: performance.results_per_page_threshold,
                max_pages: performance.max_pages,
                page_delay: performance.page_delay(),
            },
        )?;
        let expected_columns = expected_columns(&classifier.extra_columns());
        let extractor = DetailExtractor::new(
            fetcher,
            classifier,
            DetailSettings::from_config(&config.features),
        )?;
        let writer = BatchWriter::new(config.output.dir.clone())
            .with_column_filter(config.output.column_filter());

        Ok(Self {
            paginator,
            extractor,
            writer,
            expected_columns,
            progress: ProgressStore::new(config.paths.progress_file.clone()),
            resume: config.resume,
            search_marker: config.site.search_path_marker.clone(),
            listing_delay: performance.listing_delay(),
            inter_url_delay: performance.inter_url_delay(),
            max_run_time: performance.max_run_time_secs.map(Duration::from_secs),
        })
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub fn expected_columns(&self) -> &[String] {
        &self.expected_columns
    }

    /// Processes every URL in order, one artifact per unit of work.
    ///
    /// Failures inside a unit are logged and counted; they never stop the
    /// remaining listings or units.
    pub async fn run(&self, urls: &[String]) -> RunSummary {
        let deadline = self.max_run_time.map(|limit| Instant::now() + limit);
        let mut summary = RunSummary::default();

        info!("Starting run over {} URLs", urls.len());
        for (i, url) in urls.iter().enumerate() {
            if past(deadline) {
                warn!(
                    "Run time limit reached, skipping {} remaining URLs",
                    urls.len() - i
                );
                summary.deadline_reached = true;
                break;
            }
            if i > 0 {
                self.inter_url_delay.sleep().await;
            }

            let unit = UnitOfWork::classify(url, &self.search_marker);
            info!("Processing {} ({}/{}): {}", unit.label(), i + 1, urls.len(), url);
            let mut report = UnitReport::new(&unit);
            let finished = match &unit {
                UnitOfWork::Search { url, .. } => {
                    self.run_search(url, deadline, &mut report).await
                }
                UnitOfWork::Detail { url } => {
                    self.process_listing(url, &mut report).await;
                    true
                }
            };
            if !finished {
                summary.deadline_reached = true;
            }

            self.flush_unit(&mut report, &mut summary);
            info!(
                "Finished {}: {} extracted, {} failed",
                report.label, report.extracted, report.failed
            );
            summary.units.push(report);
        }

        if let Some(path) = self.salvage() {
            summary.artifacts.push(path);
        }
        summary.unwritten_rows = self.writer.len();
        info!(
            "Run complete: {} listings extracted, {} failed, {} artifacts",
            summary.extracted(),
            summary.failed(),
            summary.artifacts.len()
        );
        summary
    }

    /// Flushes whatever is still buffered under [`SALVAGE_LABEL`].
    pub fn salvage(&self) -> Option<PathBuf> {
        if self.writer.is_empty() {
            return None;
        }
        warn!(
            "Salvaging {} buffered rows as {}",
            self.writer.len(),
            SALVAGE_LABEL
        );
        match self.writer.flush(SALVAGE_LABEL, &self.expected_columns) {
            Ok(FlushOutcome::Written { path, .. }) => Some(path),
            Ok(FlushOutcome::NothingWritten) => None,
            Err(e) => {
                error!("Salvage flush failed: {}", e);
                None
            }
        }
    }

    /// Walks one search page by page. Returns false when cut short by the
    /// run deadline.
    ///
    /// The checkpoint survives every ending except running out of results:
    /// a failed page or the page limit leaves the next page to fetch, and a
    /// deadline mid-page also keeps the links of that page already done.
    async fn run_search(
        &self,
        search_url: &str,
        deadline: Option<Instant>,
        report: &mut UnitReport,
    ) -> bool {
        let resume_point = if self.resume {
            self.progress.resume_point(search_url).unwrap_or_else(|e| {
                warn!("Ignoring progress checkpoint: {:#}", e);
                None
            })
        } else {
            None
        };
        let (start_page, mut skip): (u32, HashSet<String>) = match resume_point {
            Some(entry) => (entry.page, entry.processed.into_iter().collect()),
            None => (1, HashSet::new()),
        };
        let mut cursor = PageCursor::starting_at(search_url, start_page);

        loop {
            if past(deadline) {
                warn!("Run time limit reached during {}", search_url);
                return false;
            }
            let Some(found) = self.paginator.next_page(&mut cursor).await else {
                break;
            };
            report.pages += 1;

            // links from a checkpointed page that were already written
            let mut done: Vec<String> = Vec::new();
            for link in &found.links {
                if skip.remove(link) {
                    debug!("Already processed before resume: {}", link);
                    done.push(link.clone());
                    continue;
                }
                if past(deadline) {
                    warn!("Run time limit reached on page {} of {}", found.page, search_url);
                    self.checkpoint(search_url, found.page, &done);
                    return false;
                }
                if report.attempted() > 0 {
                    self.listing_delay.sleep().await;
                }
                self.process_listing(link, report).await;
                done.push(link.clone());
            }
            skip.clear();
            self.checkpoint(search_url, cursor.page, &[]);
        }

        match cursor.stop_reason() {
            Some(StopReason::FetchFailed) => {
                warn!(
                    "Search {} stopped at page {}, keeping it for --resume",
                    search_url, cursor.page
                );
                self.checkpoint(search_url, cursor.page, &[]);
            }
            Some(StopReason::PageLimit) => {
                info!("Page limit reached, {} resumes from page {}", search_url, cursor.page);
                self.checkpoint(search_url, cursor.page, &[]);
            }
            Some(StopReason::Exhausted) | None => {
                if let Err(e) = self.progress.clear(search_url) {
                    warn!("Could not clear progress for {}: {:#}", search_url, e);
                }
            }
        }
        true
    }

    fn checkpoint(&self, search_url: &str, next_page: u32, processed: &[String]) {
        if let Err(e) = self.progress.record(search_url, next_page, processed) {
            warn!("Could not save progress for {}: {:#}", search_url, e);
        }
    }

    async fn process_listing(&self, url: &str, report: &mut UnitReport) {
        match self.extractor.extract(url).await {
            Ok(record) => {
                self.writer.add(&record);
                report.extracted += 1;
            }
            Err(e @ ExtractError::Fetch(_)) => {
                error!("Skipping {}: {}", url, e);
                report.failed += 1;
            }
            Err(e) => {
                warn!("Skipping {}: {}", url, e);
                report.failed += 1;
            }
        }
    }

    fn flush_unit(&self, report: &mut UnitReport, summary: &mut RunSummary) {
        match self.writer.flush(&report.label, &self.expected_columns) {
            Ok(FlushOutcome::Written { path, .. }) => {
                report.artifact = Some(path.clone());
                summary.artifacts.push(path);
            }
            Ok(FlushOutcome::NothingWritten) => {
                info!("No listings to write for {}", report.label);
            }
            Err(e) => {
                error!("Write failed for {}, rows kept for salvage: {}", report.label, e);
                report.write_error = Some(e.to_string());
            }
        }
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

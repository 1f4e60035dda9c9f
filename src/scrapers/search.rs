//! Search-result pagination and listing link discovery.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ExtractError;
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::DelayRange;

/// Absolute listing links shorter than this are navigation, not listings.
const MIN_LISTING_HREF_LEN: usize = 40;

/// Selectors for finding listing links on a search page, tried in order.
struct LinkSelectors {
    /// Absolute listing links anywhere inside the results list.
    results_links: Selector,
    results_items: Selector,
    /// Narrower per-card fallbacks.
    card_links: Vec<Selector>,
}

impl LinkSelectors {
    fn new(host: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            results_links: parse_selector("ul[data-testid='results'] > li a[href]")?,
            results_items: parse_selector("ul[data-testid='results'] > li")?,
            card_links: vec![
                parse_selector(
                    "a[class*='address'][href], a[data-testid='listing-card-link'][href], a[href*='/1']",
                )?,
                parse_selector("div.css-qrqvvg > a[href]")?,
                parse_selector(&format!("a[href*='{}']", host))?,
            ],
        })
    }
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector(format!("{}: {:?}", css, e)))
}

/// Settings that decide where pagination ends.
#[derive(Debug, Clone)]
pub struct PaginationSettings {
    pub base_url: String,
    /// A page with fewer links than this is treated as the last page.
    pub per_page_threshold: usize,
    pub max_pages: Option<u32>,
    pub page_delay: DelayRange,
}

/// Why a search walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No more results: an empty page, a short page, or a page of repeats.
    Exhausted,
    /// A search page could not be fetched. The cursor still points at it.
    FetchFailed,
    /// `max_pages` pages were fetched.
    PageLimit,
}

/// Where a search walk currently stands.
#[derive(Debug, Clone)]
pub struct PageCursor {
    pub search_url: String,
    /// Next page to fetch, 1-based.
    pub page: u32,
    pages_fetched: u32,
    seen: HashSet<String>,
    stopped: Option<StopReason>,
}

impl PageCursor {
    pub fn new(search_url: impl Into<String>) -> Self {
        Self::starting_at(search_url, 1)
    }

    /// Resume from a checkpointed page.
    pub fn starting_at(search_url: impl Into<String>, page: u32) -> Self {
        Self {
            search_url: search_url.into(),
            page: page.max(1),
            pages_fetched: 0,
            seen: HashSet::new(),
            stopped: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stopped.is_some()
    }

    /// Why the walk ended, or `None` while it is still going.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    fn stop(&mut self, reason: StopReason) {
        self.stopped = Some(reason);
    }
}

/// Links found on one search page, minus any already seen in this walk.
#[derive(Debug, Clone)]
pub struct PageLinks {
    pub page: u32,
    pub url: String,
    pub links: Vec<String>,
}

/// Walks the pages of a search and collects listing URLs.
pub struct SearchPaginator {
    fetcher: Arc<dyn PageFetcher>,
    settings: PaginationSettings,
    base_url: String,
    selectors: LinkSelectors,
    page_param: Regex,
}

impl SearchPaginator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        settings: PaginationSettings,
    ) -> Result<Self, ExtractError> {
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        let host = Url::parse(&base_url)
            .ok()
            .and_then(|u| {
                u.host_str().map(|h| match u.port() {
                    Some(port) => format!("{}:{}", h, port),
                    None => h.to_string(),
                })
            })
            .unwrap_or_else(|| base_url.clone());
        let page_param = Regex::new(r"([?&])page=\d+")
            .map_err(|e| ExtractError::Selector(format!("page pattern: {}", e)))?;

        Ok(Self {
            fetcher,
            selectors: LinkSelectors::new(&host)?,
            settings,
            base_url,
            page_param,
        })
    }

    /// Builds the URL of `page`, replacing or appending the page parameter.
    pub fn page_url(&self, search_url: &str, page: u32) -> String {
        if self.page_param.is_match(search_url) {
            self.page_param
                .replace(search_url, format!("${{1}}page={}", page).as_str())
                .into_owned()
        } else if search_url.contains('?') {
            format!("{}&page={}", search_url, page)
        } else {
            format!("{}?page={}", search_url, page)
        }
    }

    /// Collects every listing URL across all pages of a search.
    ///
    /// The result is de-duplicated and sorted.
    pub async fn paginate(&self, search_url: &str) -> Vec<String> {
        let mut cursor = PageCursor::new(search_url);
        let mut all = BTreeSet::new();
        while let Some(found) = self.next_page(&mut cursor).await {
            all.extend(found.links);
        }
        info!(
            "Search complete, {} unique listing links over {} pages",
            all.len(),
            cursor.pages_fetched()
        );
        all.into_iter().collect()
    }

    /// Fetches the cursor's next page, or `None` once the walk has ended.
    ///
    /// A page with no links, or only links already seen in this walk, ends
    /// the walk and yields `None`. A page with fewer links than the threshold
    /// is returned and then ends the walk. [`PageCursor::stop_reason`] tells
    /// the endings apart.
    pub async fn next_page(&self, cursor: &mut PageCursor) -> Option<PageLinks> {
        if cursor.is_done() {
            return None;
        }
        if let Some(max) = self.settings.max_pages {
            if cursor.pages_fetched >= max {
                info!("Reached page limit ({}) for {}", max, cursor.search_url);
                cursor.stop(StopReason::PageLimit);
                return None;
            }
        }

        if cursor.pages_fetched > 0 {
            self.settings.page_delay.sleep().await;
        }

        let page = cursor.page;
        let url = self.page_url(&cursor.search_url, page);
        info!("Fetching search page {}: {}", page, url);
        cursor.pages_fetched += 1;

        let html = match self.fetcher.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Search page {} unavailable, ending search: {}", page, e);
                cursor.stop(StopReason::FetchFailed);
                return None;
            }
        };

        let links = self.links_on_page(&html);
        if links.is_empty() {
            info!(
                "No listing links on page {}, end of results for {}",
                page, cursor.search_url
            );
            cursor.stop(StopReason::Exhausted);
            return None;
        }

        info!("Found {} listings on page {}", links.len(), page);
        let found = links.len();
        let fresh: Vec<String> = links
            .into_iter()
            .filter(|link| cursor.seen.insert(link.clone()))
            .collect();
        if fresh.is_empty() {
            info!(
                "Page {} only repeats earlier listings, end of results for {}",
                page, cursor.search_url
            );
            cursor.stop(StopReason::Exhausted);
            return None;
        }

        if found < self.settings.per_page_threshold {
            info!(
                "Page {} has {} listings (< {}), treating it as the last page",
                page, found, self.settings.per_page_threshold
            );
            cursor.stop(StopReason::Exhausted);
        }
        cursor.page += 1;

        Some(PageLinks {
            page,
            url,
            links: fresh,
        })
    }

    /// Extracts the unique listing links from a search page.
    pub fn links_on_page(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let prefix = format!("{}/", self.base_url);

        let mut links: Vec<String> = document
            .select(&self.selectors.results_links)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| href.len() > MIN_LISTING_HREF_LEN && href.starts_with(&prefix))
            .map(str::to_string)
            .collect();

        if links.is_empty() {
            debug!("Primary results selector found nothing, trying per-card fallbacks");
            for item in document.select(&self.selectors.results_items) {
                let href = self
                    .selectors
                    .card_links
                    .iter()
                    .find_map(|sel| item.select(sel).find_map(|a| a.value().attr("href")));
                if let Some(href) = href {
                    let absolute = self.absolutize(href.trim());
                    if absolute.starts_with(&prefix) {
                        links.push(absolute);
                    }
                }
            }
        }

        if links.is_empty() {
            warn!("No listing links found on search page, selectors may be stale");
        }

        let mut seen = HashSet::new();
        links.retain(|link| seen.insert(link.clone()));
        links
    }

    fn absolutize(&self, href: &str) -> String {
        if href.starts_with('/') {
            format!("{}{}", self.base_url, href)
        } else {
            href.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const BASE: &str = "https://www.domain.com.au";

    /// Serves canned pages and records what was asked for.
    struct CannedFetcher {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::FetchFailed {
                    url: url.to_string(),
                    attempts: 1,
                    last: crate::error::AttemptError::Status(404),
                })
        }

        fn backend_name(&self) -> &'static str {
            "canned"
        }
    }

    fn listing(id: u32) -> String {
        format!("{}/{}-example-street-sydney-nsw-2000-{}", BASE, id, 2019000000 + id)
    }

    fn results_page(ids: &[u32]) -> String {
        let items: String = ids
            .iter()
            .map(|id| format!(r#"<li><div><a href="{}">Listing {}</a></div></li>"#, listing(*id), id))
            .collect();
        format!(
            r#"<html><body><a href="{BASE}/rent/">Rent</a><ul data-testid="results">{items}</ul></body></html>"#
        )
    }

    fn paginator(pages: Vec<(String, String)>, threshold: usize) -> (Arc<CannedFetcher>, SearchPaginator) {
        let fetcher = Arc::new(CannedFetcher {
            pages: pages.into_iter().collect(),
            requested: Mutex::new(Vec::new()),
        });
        let settings = PaginationSettings {
            base_url: BASE.to_string(),
            per_page_threshold: threshold,
            max_pages: None,
            page_delay: DelayRange::zero(),
        };
        let paginator = SearchPaginator::new(fetcher.clone(), settings).unwrap();
        (fetcher, paginator)
    }

    #[test]
    fn page_url_replaces_or_appends() {
        let (_, p) = paginator(vec![], 10);
        assert_eq!(
            p.page_url("https://x.com/rent/?suburb=a&page=1", 3),
            "https://x.com/rent/?suburb=a&page=3"
        );
        assert_eq!(
            p.page_url("https://x.com/rent/?suburb=a", 2),
            "https://x.com/rent/?suburb=a&page=2"
        );
        assert_eq!(
            p.page_url("https://x.com/rent/sydney-nsw-2000/", 1),
            "https://x.com/rent/sydney-nsw-2000/?page=1"
        );
        assert_eq!(
            p.page_url("https://x.com/rent/?homepage=1&subpage=2", 4),
            "https://x.com/rent/?homepage=1&subpage=2&page=4"
        );
        assert_eq!(
            p.page_url("https://x.com/rent/?page=2&homepage=1", 5),
            "https://x.com/rent/?page=5&homepage=1"
        );
    }

    #[test]
    fn primary_selector_filters_short_and_foreign_links() {
        let (_, p) = paginator(vec![], 10);
        let html = format!(
            r#"<ul data-testid="results">
                <li><a href="{}">ok</a></li>
                <li><a href="{BASE}/rent/">too short</a></li>
                <li><a href="https://elsewhere.example.com/some/very/long/path/that/is/long">foreign</a></li>
                <li><a href="{}">duplicate</a></li>
            </ul>"#,
            listing(1),
            listing(1)
        );
        assert_eq!(p.links_on_page(&html), vec![listing(1)]);
    }

    #[test]
    fn fallback_selectors_absolutize_relative_links() {
        let (_, p) = paginator(vec![], 10);
        let html = r#"<ul data-testid="results">
            <li><a class="listing-address" href="/5-smith-st-ultimo-nsw-2007-2019000005">5 Smith St</a></li>
            <li><div class="css-qrqvvg"><a href="/7-jones-st-ultimo-nsw-2007-2019000007">7 Jones St</a></div></li>
            <li><a href="https://www.domain.com.au/9-brown-st">9 Brown St</a></li>
            <li><a href="https://ads.example.com/promo">Ad</a></li>
        </ul>"#;
        assert_eq!(
            p.links_on_page(html),
            vec![
                format!("{BASE}/5-smith-st-ultimo-nsw-2007-2019000005"),
                format!("{BASE}/7-jones-st-ultimo-nsw-2007-2019000007"),
                format!("{BASE}/9-brown-st"),
            ]
        );
    }

    #[tokio::test]
    async fn stops_after_short_page() {
        let search = format!("{BASE}/rent/?suburb=sydney-nsw-2000");
        let (fetcher, p) = paginator(
            vec![
                (format!("{search}&page=1"), results_page(&[1, 2, 3])),
                (format!("{search}&page=2"), results_page(&[4])),
                (format!("{search}&page=3"), results_page(&[5, 6, 7])),
            ],
            3,
        );

        let urls = p.paginate(&search).await;
        assert_eq!(urls.len(), 4);
        assert!(urls.contains(&listing(4)));
        assert!(!urls.contains(&listing(5)));
        assert_eq!(fetcher.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stops_on_empty_page_and_dedupes_across_pages() {
        let search = format!("{BASE}/rent/?suburb=sydney-nsw-2000");
        let (fetcher, p) = paginator(
            vec![
                (format!("{search}&page=1"), results_page(&[1, 2])),
                (format!("{search}&page=2"), results_page(&[2, 3])),
                (format!("{search}&page=3"), results_page(&[])),
            ],
            2,
        );

        let mut cursor = PageCursor::new(&search);
        let first = p.next_page(&mut cursor).await.unwrap();
        assert_eq!(first.links, vec![listing(1), listing(2)]);
        let second = p.next_page(&mut cursor).await.unwrap();
        assert_eq!(second.links, vec![listing(3)]);
        assert!(p.next_page(&mut cursor).await.is_none());
        assert_eq!(cursor.stop_reason(), Some(StopReason::Exhausted));
        assert_eq!(fetcher.requested.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn repeated_full_page_ends_search() {
        let search = format!("{BASE}/rent/?suburb=sydney-nsw-2000");
        let (fetcher, p) = paginator(
            (1..=5)
                .map(|n| (format!("{search}&page={n}"), results_page(&[1, 2, 3])))
                .collect(),
            3,
        );

        let mut cursor = PageCursor::new(&search);
        assert_eq!(p.next_page(&mut cursor).await.unwrap().links.len(), 3);
        assert!(p.next_page(&mut cursor).await.is_none());
        assert_eq!(cursor.stop_reason(), Some(StopReason::Exhausted));
        assert_eq!(fetcher.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_ends_search() {
        let search = format!("{BASE}/rent/?suburb=nowhere");
        let (_, p) = paginator(vec![], 1);
        assert!(p.paginate(&search).await.is_empty());

        let mut cursor = PageCursor::starting_at(&search, 4);
        assert!(p.next_page(&mut cursor).await.is_none());
        assert_eq!(cursor.stop_reason(), Some(StopReason::FetchFailed));
        assert_eq!(cursor.page, 4);
    }

    #[tokio::test]
    async fn resume_and_page_cap() {
        let search = format!("{BASE}/rent/?suburb=sydney-nsw-2000");
        let (fetcher, mut p) = paginator(
            vec![
                (format!("{search}&page=3"), results_page(&[5, 6])),
                (format!("{search}&page=4"), results_page(&[7, 8])),
            ],
            2,
        );
        p.settings.max_pages = Some(1);

        let mut cursor = PageCursor::starting_at(&search, 3);
        let page = p.next_page(&mut cursor).await.unwrap();
        assert_eq!(page.page, 3);
        assert!(p.next_page(&mut cursor).await.is_none());
        assert_eq!(cursor.stop_reason(), Some(StopReason::PageLimit));
        assert_eq!(cursor.page, 4);
        assert_eq!(
            *fetcher.requested.lock().unwrap(),
            vec![format!("{search}&page=3")]
        );
    }
}

use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Random politeness delay window, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

impl DelayRange {
    pub fn new(min: f64, max: f64) -> Self {
        let min = min.max(0.0);
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.max <= 0.0
    }

    pub fn sample(&self) -> Duration {
        if self.is_zero() {
            return Duration::ZERO;
        }
        let secs = if self.max > self.min {
            rand::thread_rng().gen_range(self.min..=self.max)
        } else {
            self.min
        };
        Duration::from_secs_f64(secs)
    }

    /// Sleeps for a random duration in the window. No-op when zero.
    pub async fn sleep(&self) {
        let wait = self.sample();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self::zero()
    }
}

/// One line of the URL list: the granularity of one output artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOfWork {
    Search { url: String, label: String },
    Detail { url: String },
}

impl UnitOfWork {
    /// Treats URLs containing `search_marker` as paginated searches.
    pub fn classify(url: &str, search_marker: &str) -> Self {
        if !search_marker.is_empty() && url.contains(search_marker) {
            Self::Search {
                url: url.to_string(),
                label: region_label(url, search_marker),
            }
        } else {
            Self::Detail {
                url: url.to_string(),
            }
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Search { url, .. } | Self::Detail { url } => url,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Search { label, .. } => label,
            Self::Detail { .. } => "listing",
        }
    }
}

/// Derives an artifact label from a search URL.
///
/// `/rent/sydney-nsw-2000/` gives `Sydney`; several `+`-joined regions give
/// `Sydney_Multi`. Falls back to a `suburb=` query parameter, then
/// `Unknown_Region`.
pub fn region_label(url: &str, search_marker: &str) -> String {
    let marker = regex::escape(search_marker.trim_end_matches('/'));
    let from_path = Regex::new(&format!(r"{}/([^/?#]+)", marker))
        .ok()
        .and_then(|re| re.captures(url).map(|c| c[1].to_string()));

    let from_query = || {
        Url::parse(url).ok().and_then(|parsed| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "suburb")
                .map(|(_, value)| value.into_owned())
        })
    };

    match from_path.or_else(from_query) {
        Some(region) if !region.is_empty() => {
            // query values decode '+' to a space
            let mut parts = region.split(['+', ' ']).filter(|p| !p.is_empty());
            let name = parts.next().map(region_name).unwrap_or_default();
            if name.is_empty() {
                "Unknown_Region".to_string()
            } else if parts.next().is_some() {
                format!("{}_Multi", name)
            } else {
                name
            }
        }
        _ => "Unknown_Region".to_string(),
    }
}

/// `sydney-nsw-2000` -> `Sydney`
fn region_name(slug: &str) -> String {
    let first = slug.split(['-', ',']).next().unwrap_or("");
    let mut chars = first.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_range_never_sleeps() {
        assert_eq!(DelayRange::zero().sample(), Duration::ZERO);
        assert_eq!(DelayRange::new(-1.0, -2.0).sample(), Duration::ZERO);
    }

    #[test]
    fn sample_stays_in_window() {
        let range = DelayRange::new(0.5, 1.0);
        for _ in 0..50 {
            let d = range.sample().as_secs_f64();
            assert!((0.5..=1.0).contains(&d), "{d}");
        }
    }

    #[test]
    fn classify_search_and_detail() {
        let search = UnitOfWork::classify(
            "https://www.domain.com.au/rent/sydney-nsw-2000/?excludedeposittaken=1",
            "/rent/",
        );
        assert_eq!(search.label(), "Sydney");
        assert!(matches!(search, UnitOfWork::Search { .. }));

        let detail =
            UnitOfWork::classify("https://www.domain.com.au/1-a-st-sydney-2019000001", "/rent/");
        assert_eq!(detail.label(), "listing");
        assert!(matches!(detail, UnitOfWork::Detail { .. }));
    }

    #[test]
    fn region_label_variants() {
        assert_eq!(
            region_label(
                "https://www.domain.com.au/rent/sydney-nsw-2000+parramatta-nsw-2150/",
                "/rent/"
            ),
            "Sydney_Multi"
        );
        assert_eq!(
            region_label("https://www.domain.com.au/rent/?suburb=ultimo-nsw-2007", "/rent/"),
            "Ultimo"
        );
        assert_eq!(
            region_label(
                "https://www.domain.com.au/rent/?suburb=surry-hills-nsw-2010+redfern-nsw-2016",
                "/rent/"
            ),
            "Surry_Multi"
        );
        assert_eq!(
            region_label("https://www.domain.com.au/rent/?ptype=apartment", "/rent/"),
            "Unknown_Region"
        );
    }
}

//! Detail page extraction.
//!
//! Every output field is resolved through an ordered chain of resolvers:
//! the embedded `__NEXT_DATA__` payload first, then alternative payload
//! paths, then the rendered markup. The first resolver that finds a value
//! wins; when none does the field keeps its default.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::features::FeatureClassifier;
use crate::models::ListingRecord;
use crate::scrapers::clean::{
    bedroom_display, clean_description, clean_text, normalize_available_date, parse_price,
};
use crate::scrapers::search::parse_selector;
use crate::scrapers::traits::PageFetcher;

static NULL: Value = Value::Null;

/// Markup selectors used by the fallback resolvers.
struct DetailSelectors {
    next_data: Selector,
    heading: Selector,
    property_type: Selector,
    summary_title: Selector,
    available: Selector,
    inspection_block: Selector,
    inspection_day: Selector,
    inspection_time: Selector,
    phone_cta: Selector,
    agency_logo: Selector,
    apply_link: Selector,
    oneform: Selector,
    cta_form: Selector,
    enquiry_form: Selector,
    headline: Selector,
    description: Selector,
    feature_items: Selector,
}

impl DetailSelectors {
    fn new() -> Result<Self, ExtractError> {
        const CTA_BOX: &str = "div[data-testid='listing-details__agent-details-cta-box']";
        Ok(Self {
            next_data: parse_selector("script#__NEXT_DATA__")?,
            heading: parse_selector("h1")?,
            property_type: parse_selector("span.css-1efi8gv")?,
            summary_title: parse_selector("[data-testid='listing-details__summary-title']")?,
            available: parse_selector("[data-testid='listing-details__summary-strip-available']")?,
            inspection_block: parse_selector(
                "div[data-testid='listing-details__inspections-block']",
            )?,
            inspection_day: parse_selector(
                "span[data-testid='listing-details__inspections-block-day']",
            )?,
            inspection_time: parse_selector(
                "span[data-testid='listing-details__inspections-block-time']",
            )?,
            phone_cta: parse_selector("a[data-testid='listing-details__phone-cta-button']")?,
            agency_logo: parse_selector(
                "a.css-wrjy08 > img[data-testid='listing-details__agent-details-branding-lazy']",
            )?,
            apply_link: parse_selector(&format!(
                "{CTA_BOX} a[href*='snug.com'], {CTA_BOX} a[href*='2apply.com.au']"
            ))?,
            oneform: parse_selector(&format!(
                "{CTA_BOX} form[data-testid='listing-details__oneform-button-form']"
            ))?,
            cta_form: parse_selector(&format!("{CTA_BOX} form[class*='css-']"))?,
            enquiry_form: parse_selector("form#enquiry-form")?,
            headline: parse_selector("[data-testid='listing-details__description-headline']")?,
            description: parse_selector("[data-testid='listing-details__description']")?,
            feature_items: parse_selector("div#property-features li")?,
        })
    }
}

/// Everything a resolver may look at for one page.
struct PageSources<'a> {
    document: &'a Html,
    selectors: &'a DetailSelectors,
    listing: &'a Value,
    summary: &'a Value,
    component: &'a Value,
}

impl PageSources<'_> {
    fn listing_str(&self, pointer: &str) -> Option<String> {
        self.listing.pointer(pointer).and_then(text_value)
    }

    fn listing_num(&self, pointer: &str) -> Option<f64> {
        self.listing.pointer(pointer).and_then(number_value)
    }

    fn summary_str(&self, pointer: &str) -> Option<String> {
        self.summary.pointer(pointer).and_then(text_value)
    }

    fn summary_num(&self, pointer: &str) -> Option<f64> {
        self.summary.pointer(pointer).and_then(number_value)
    }

    /// A field of the first listed agent.
    fn agent_str(&self, field: &str) -> Option<String> {
        self.listing_str(&format!("/agents/0/{}", field))
    }

    fn first(&self, selector: &Selector) -> Option<ElementRef<'_>> {
        self.document.select(selector).next()
    }

    fn markup_text(&self, selector: &Selector) -> Option<String> {
        self.first(selector).and_then(|el| non_empty(element_text(&el)))
    }

    fn markup_attr(&self, selector: &Selector, attr: &str) -> Option<String> {
        self.first(selector)
            .and_then(|el| el.value().attr(attr))
            .and_then(|v| non_empty(v.trim().to_string()))
    }

    fn markup_html(&self, selector: &Selector) -> Option<String> {
        self.first(selector)
            .and_then(|el| non_empty(el.inner_html().trim().to_string()))
    }
}

/// One link of a fallback chain: a label for logs and the lookup itself.
type Resolver<T> = (&'static str, fn(&PageSources<'_>) -> Option<T>);

fn resolve<T>(field: &str, sources: &PageSources<'_>, chain: &[Resolver<T>]) -> Option<T> {
    for (source, resolver) in chain {
        if let Some(value) = resolver(sources) {
            debug!("{} resolved from {}", field, source);
            return Some(value);
        }
    }
    debug!("{} not found, using default", field);
    None
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

fn count(value: Option<f64>) -> i32 {
    value.map(|v| v as i32).unwrap_or(0)
}

fn string_list(value: Option<&Value>, field: Option<&str>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match field {
                    Some(field) => item.get(field).and_then(text_value),
                    None => text_value(item),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty_list(list: Vec<String>) -> Option<Vec<String>> {
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// Extraction switches.
#[derive(Debug, Clone, Copy)]
pub struct DetailSettings {
    pub preserve_description_format: bool,
    pub validate: bool,
}

impl Default for DetailSettings {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl DetailSettings {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            preserve_description_format: config.preserve_description_format,
            validate: config.enable_data_validation,
        }
    }
}

/// Turns detail pages into classified [`ListingRecord`]s.
pub struct DetailExtractor {
    fetcher: Arc<dyn PageFetcher>,
    classifier: Arc<FeatureClassifier>,
    settings: DetailSettings,
    selectors: DetailSelectors,
}

impl DetailExtractor {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        classifier: Arc<FeatureClassifier>,
        settings: DetailSettings,
    ) -> Result<Self, ExtractError> {
        Ok(Self {
            fetcher,
            classifier,
            settings,
            selectors: DetailSelectors::new()?,
        })
    }

    /// Fetch and parse one detail page.
    pub async fn extract(&self, url: &str) -> Result<ListingRecord, ExtractError> {
        info!("Fetching listing {}", url);
        let html = self.fetcher.fetch(url).await?;
        self.parse(url, &html, Local::now().date_naive())
    }

    /// Parse a detail page already in hand. `today` anchors the
    /// available-date normalisation.
    pub fn parse(
        &self,
        url: &str,
        html: &str,
        today: NaiveDate,
    ) -> Result<ListingRecord, ExtractError> {
        let document = Html::parse_document(html);

        let script = document
            .select(&self.selectors.next_data)
            .next()
            .map(|el| el.text().collect::<String>())
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| {
                ExtractError::MissingPayload(format!("no __NEXT_DATA__ script on {}", url))
            })?;
        let payload: Value = serde_json::from_str(&script)?;

        let page_props = payload.pointer("/props/pageProps").unwrap_or(&NULL);
        let component = page_props.pointer("/componentProps").unwrap_or(&NULL);
        let listing = [
            component.pointer("/rootGraphQuery/listingByIdV2"),
            page_props.pointer("/listing"),
        ]
        .into_iter()
        .flatten()
        .find(|v| v.as_object().is_some_and(|o| !o.is_empty()))
        .ok_or_else(|| ExtractError::MissingPayload(format!("no listing object on {}", url)))?;

        let sources = PageSources {
            document: &document,
            selectors: &self.selectors,
            listing,
            summary: component.pointer("/listingSummary").unwrap_or(&NULL),
            component,
        };

        let record = self.build_record(url, &sources, today);
        if self.settings.validate {
            for warning in record.validate() {
                warn!("Validation warning for {}: {}", url, warning);
            }
        }
        info!(
            "Extracted listing {} from {}",
            if record.id.is_empty() { "N/A" } else { record.id.as_str() },
            url
        );
        Ok(record)
    }

    fn build_record(&self, url: &str, s: &PageSources<'_>, today: NaiveDate) -> ListingRecord {
        let mut record = ListingRecord::new(url);

        let id: &[Resolver<String>] = &[
            ("listing.listingId", |s| s.listing_str("/listingId")),
            ("listing.id", |s| s.listing_str("/id")),
        ];
        record.id = resolve("listing_id", s, id).unwrap_or_default();

        let address: &[Resolver<String>] = &[
            ("summary.address", |s| s.summary_str("/address")),
            ("listing.displayableAddress", |s| {
                s.listing_str("/displayableAddress/displayAddress")
            }),
            ("h1", |s| s.markup_text(&s.selectors.heading)),
        ];
        record.location.address = resolve("address", s, address)
            .map(|a| clean_text(&a))
            .unwrap_or_default();

        let suburb: &[Resolver<String>] = &[
            ("displayableAddress.suburbName", |s| {
                s.listing_str("/displayableAddress/suburbName")
            }),
            ("address.suburb", |s| s.listing_str("/address/suburb")),
        ];
        record.location.suburb = resolve("suburb", s, suburb).unwrap_or_default();

        let state: &[Resolver<String>] = &[
            ("displayableAddress.state", |s| s.listing_str("/displayableAddress/state")),
            ("address.state", |s| s.listing_str("/address/state")),
        ];
        record.location.state = resolve("state", s, state).unwrap_or_default();

        let postcode: &[Resolver<String>] = &[
            ("displayableAddress.postcode", |s| {
                s.listing_str("/displayableAddress/postcode")
            }),
            ("address.postcode", |s| s.listing_str("/address/postcode")),
        ];
        record.location.postcode = resolve("postcode", s, postcode).unwrap_or_default();

        let property_type: &[Resolver<String>] = &[
            ("listing.propertyType", |s| s.listing_str("/propertyType")),
            ("summary.propertyType", |s| s.summary_str("/propertyType")),
            ("property type markup", |s| s.markup_text(&s.selectors.property_type)),
        ];
        record.property_type = resolve("property_type", s, property_type).unwrap_or_default();

        let rent: &[Resolver<f64>] = &[
            ("summary.title", |s| s.summary_str("/title").and_then(|t| parse_price(&t))),
            ("priceDetails.displayPrice", |s| {
                s.listing_str("/priceDetails/displayPrice")
                    .and_then(|t| parse_price(&t))
            }),
            ("summary title markup", |s| {
                s.markup_text(&s.selectors.summary_title)
                    .and_then(|t| parse_price(&t))
            }),
        ];
        record.rent_per_week = resolve("rent_pw", s, rent).unwrap_or(0.0);

        let bond: &[Resolver<f64>] =
            &[("priceDetails.bond", |s| s.listing_num("/priceDetails/bond"))];
        record.bond = resolve("bond", s, bond).unwrap_or(0.0);

        let bedrooms: &[Resolver<f64>] = &[
            ("summary.beds", |s| s.summary_num("/beds")),
            ("listing.bedrooms", |s| s.listing_num("/bedrooms")),
        ];
        record.bedrooms = count(resolve("bedrooms", s, bedrooms));

        let bathrooms: &[Resolver<f64>] = &[
            ("summary.baths", |s| s.summary_num("/baths")),
            ("listing.bathrooms", |s| s.listing_num("/bathrooms")),
        ];
        record.bathrooms = count(resolve("bathrooms", s, bathrooms));

        let parking: &[Resolver<f64>] = &[
            ("summary.parking", |s| s.summary_num("/parking")),
            ("listing.carspaces", |s| s.listing_num("/carspaces")),
        ];
        record.parking = count(resolve("parking_spaces", s, parking));

        let available: &[Resolver<String>] = &[
            ("dateAvailableV2.isoDate", |s| s.listing_str("/dateAvailableV2/isoDate")),
            ("listing.dateAvailable", |s| s.listing_str("/dateAvailable")),
            ("available markup", |s| s.markup_text(&s.selectors.available)),
        ];
        let raw_available = resolve("available_date", s, available).unwrap_or_default();
        record.available = normalize_available_date(&raw_available, today);

        let inspections: &[Resolver<Vec<String>>] = &[
            ("inspection markup", inspection_markup),
            ("inspectionDetails", |s| {
                let times = s
                    .component
                    .pointer("/inspectionDetails/inspections")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| {
                                let start = item.get("startTime").and_then(text_value)?;
                                let end = item.get("endTime").and_then(text_value)?;
                                Some(format!("{} - {}", start, end))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                non_empty_list(times)
            }),
        ];
        record.inspection_times = resolve("inspection_times", s, inspections).unwrap_or_default();

        self.fill_agent(&mut record, s);

        let enquiry: &[Resolver<String>] = &[
            ("apply link", |s| s.markup_attr(&s.selectors.apply_link, "href")),
            ("one-form button", |s| s.markup_attr(&s.selectors.oneform, "action")),
            ("cta form", |s| s.markup_attr(&s.selectors.cta_form, "action")),
            ("enquiry form", |s| s.markup_attr(&s.selectors.enquiry_form, "action")),
        ];
        record.enquiry_form_action = resolve("enquiry_form_action", s, enquiry).unwrap_or_default();

        let headline: &[Resolver<String>] = &[
            ("listing.headline", |s| s.listing_str("/headline")),
            ("headline markup", |s| s.markup_text(&s.selectors.headline)),
        ];
        record.headline = resolve("property_headline", s, headline).unwrap_or_default();

        let description: &[Resolver<String>] = &[
            ("listing.description", |s| s.listing_str("/description")),
            ("description markup", |s| s.markup_html(&s.selectors.description)),
        ];
        let raw_description = resolve("property_description", s, description).unwrap_or_default();
        record.description =
            clean_description(&raw_description, self.settings.preserve_description_format);

        let geolocation: &[Resolver<(f64, f64)>] = &[
            ("displayableAddress.geolocation", |s| {
                Some((
                    s.listing_num("/displayableAddress/geolocation/latitude")?,
                    s.listing_num("/displayableAddress/geolocation/longitude")?,
                ))
            }),
            ("listing.geolocation", |s| {
                Some((
                    s.listing_num("/geolocation/latitude")?,
                    s.listing_num("/geolocation/longitude")?,
                ))
            }),
        ];
        if let Some((lat, lng)) = resolve("geolocation", s, geolocation) {
            record.location.latitude = Some(lat);
            record.location.longitude = Some(lng);
        }

        let images: &[Resolver<Vec<String>>] = &[
            ("listing.largeMedia", |s| {
                non_empty_list(string_list(s.listing.pointer("/largeMedia"), Some("url")))
            }),
            ("listing.media", |s| {
                let urls = s
                    .listing
                    .pointer("/media")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter(|m| m.get("type").and_then(Value::as_str) == Some("image"))
                            .filter_map(|m| m.get("url").and_then(text_value))
                            .collect()
                    })
                    .unwrap_or_default();
                non_empty_list(urls)
            }),
        ];
        record.images = resolve("images", s, images).unwrap_or_default();

        let bullets: &[Resolver<Vec<String>>] = &[
            ("property features markup", |s| {
                let items = s
                    .document
                    .select(&s.selectors.feature_items)
                    .map(|li| element_text(&li))
                    .filter(|t| !t.is_empty())
                    .collect();
                non_empty_list(items)
            }),
            ("listing.features", |s| {
                non_empty_list(string_list(s.listing.pointer("/features"), None))
            }),
        ];
        record.feature_bullets = resolve("property_features", s, bullets).unwrap_or_default();

        let structured = string_list(s.listing.pointer("/structuredFeatures"), Some("name"));
        record.features =
            self.classifier
                .classify(&record.description, &record.feature_bullets, &structured);

        let bullet_text = record.feature_bullets.join(" ");
        record.bedroom_display = bedroom_display(
            record.bedrooms,
            &[
                &record.property_type,
                &record.headline,
                &record.description,
                &bullet_text,
            ],
        );

        record
    }

    fn fill_agent(&self, record: &mut ListingRecord, s: &PageSources<'_>) {
        let agent = &mut record.agent;

        let agency: &[Resolver<String>] = &[
            ("listing.agency.name", |s| s.listing_str("/agency/name")),
            ("agent.agency.name", |s| s.agent_str("agency/name")),
        ];
        agent.agency_name = resolve("agency_name", s, agency).unwrap_or_default();
        agent.agent_name = s.agent_str("fullName").unwrap_or_default();
        agent.email = s.agent_str("email").unwrap_or_default();
        agent.profile_url = s.agent_str("profileUrl").unwrap_or_default();

        let phone: &[Resolver<String>] = &[
            ("agent.phoneNumber", |s| {
                s.agent_str("phoneNumber")
                    .filter(|p| !p.eq_ignore_ascii_case("call"))
            }),
            ("phone cta href", |s| {
                s.markup_attr(&s.selectors.phone_cta, "href")
                    .and_then(|href| href.strip_prefix("tel:").map(|p| p.trim().to_string()))
                    .and_then(non_empty)
            }),
            ("phone cta label", |s| s.markup_text(&s.selectors.phone_cta)),
        ];
        agent.phone = resolve("agent_phone", s, phone).unwrap_or_default();

        let logo: &[Resolver<String>] = &[
            ("agent.agency.logoUrl", |s| s.agent_str("agency/logoUrl")),
            ("branding image", |s| s.markup_attr(&s.selectors.agency_logo, "src")),
        ];
        agent.logo_url = resolve("agent_logo_url", s, logo).unwrap_or_default();
    }
}

/// `"{day}, {time}"` for every inspection block carrying both.
fn inspection_markup(s: &PageSources<'_>) -> Option<Vec<String>> {
    let times = s
        .document
        .select(&s.selectors.inspection_block)
        .filter_map(|block| {
            let day = block
                .select(&s.selectors.inspection_day)
                .next()
                .map(|el| element_text(&el))
                .and_then(non_empty)?;
            let time = block
                .select(&s.selectors.inspection_time)
                .next()
                .map(|el| element_text(&el))
                .and_then(non_empty)?;
            Some(format!("{}, {}", day, time))
        })
        .collect();
    non_empty_list(times)
}

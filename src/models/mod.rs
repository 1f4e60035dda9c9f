pub mod features;

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationWarning;

pub use features::{AirConditioningType, Amenities, Amenity, FeatureSet, FurnishingStatus};

/// Base output columns, before the feature and media columns.
pub const BASE_COLUMNS: &[&str] = &[
    "listing_id",
    "property_url",
    "address",
    "suburb",
    "state",
    "postcode",
    "property_type",
    "rent_pw",
    "bond",
    "bedrooms",
    "bathrooms",
    "parking_spaces",
    "bedroom_display",
    "available_date",
    "inspection_times",
    "agency_name",
    "agent_name",
    "cover_image",
    "agent_phone",
    "agent_email",
    "property_headline",
    "property_description",
];

/// Columns following the classified features.
pub const TRAILING_COLUMNS: &[&str] = &[
    "latitude",
    "longitude",
    "images",
    "property_features",
    "agent_profile_url",
    "agent_logo_url",
    "enquiry_form_action",
    "image_1",
    "image_2",
    "image_3",
    "image_4",
];

const IMAGE_COLUMNS: usize = 4;

/// Location information for a listing
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub address: String,
    pub suburb: String,
    pub state: String,
    pub postcode: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Agency and agent contact details
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentDetails {
    pub agency_name: String,
    pub agent_name: String,
    pub phone: String,
    pub email: String,
    pub profile_url: String,
    pub logo_url: String,
}

/// When the property can be moved into.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AvailableDate {
    #[default]
    Now,
    On(NaiveDate),
}

impl fmt::Display for AvailableDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now => f.write_str("Available Now"),
            Self::On(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

/// Bedroom count as shown to readers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum BedroomDisplay {
    Count(u32),
    Studio,
    /// Zero bedrooms reported and nothing in the text says studio. Written
    /// as an empty cell.
    #[default]
    Unknown,
}

impl fmt::Display for BedroomDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{}", n),
            Self::Studio => f.write_str("Studio"),
            Self::Unknown => Ok(()),
        }
    }
}

/// Core listing data model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub url: String,
    pub location: Location,
    pub property_type: String,
    pub rent_per_week: f64,
    pub bond: f64,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub parking: i32,
    pub bedroom_display: BedroomDisplay,
    pub available: AvailableDate,
    pub inspection_times: Vec<String>,
    pub agent: AgentDetails,
    pub enquiry_form_action: String,
    pub headline: String,
    pub description: String,
    pub images: Vec<String>,
    pub feature_bullets: Vec<String>,
    pub features: FeatureSet,
    pub scraped_at: DateTime<Utc>,
}

impl ListingRecord {
    /// An empty record for `url`, stamped now.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            url: url.into(),
            location: Location::default(),
            property_type: String::new(),
            rent_per_week: 0.0,
            bond: 0.0,
            bedrooms: 0,
            bathrooms: 0,
            parking: 0,
            bedroom_display: BedroomDisplay::default(),
            available: AvailableDate::default(),
            inspection_times: Vec::new(),
            agent: AgentDetails::default(),
            enquiry_form_action: String::new(),
            headline: String::new(),
            description: String::new(),
            images: Vec::new(),
            feature_bullets: Vec::new(),
            features: FeatureSet::default(),
            scraped_at: Utc::now(),
        }
    }

    pub fn cover_image(&self) -> &str {
        self.images.first().map(String::as_str).unwrap_or("")
    }

    /// Field-level sanity checks. The record is kept regardless.
    pub fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        if self.id.trim().is_empty() {
            warnings.push(ValidationWarning::MissingId);
        }
        if self.url.trim().is_empty() {
            warnings.push(ValidationWarning::MissingUrl);
        }
        for (field, value) in [("rent_pw", self.rent_per_week), ("bond", self.bond)] {
            if value < 0.0 {
                warnings.push(ValidationWarning::Negative { field, value });
            }
        }
        for (field, value) in [
            ("bedrooms", self.bedrooms),
            ("bathrooms", self.bathrooms),
            ("parking_spaces", self.parking),
        ] {
            if value < 0 {
                warnings.push(ValidationWarning::Negative {
                    field,
                    value: value as f64,
                });
            }
        }
        if let Some(lat) = self.location.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                warnings.push(ValidationWarning::LatitudeOutOfRange(lat));
            }
        }
        if let Some(lng) = self.location.longitude {
            if !(-180.0..=180.0).contains(&lng) {
                warnings.push(ValidationWarning::LongitudeOutOfRange(lng));
            }
        }
        warnings
    }

    /// Flattens the record into ordered column/value pairs.
    pub fn to_row(&self) -> Vec<(String, String)> {
        let loc = &self.location;
        let mut row: Vec<(String, String)> = vec![
            ("listing_id".into(), self.id.clone()),
            ("property_url".into(), self.url.clone()),
            ("address".into(), loc.address.clone()),
            ("suburb".into(), loc.suburb.clone()),
            ("state".into(), loc.state.clone()),
            ("postcode".into(), loc.postcode.clone()),
            ("property_type".into(), self.property_type.clone()),
            ("rent_pw".into(), self.rent_per_week.to_string()),
            ("bond".into(), self.bond.to_string()),
            ("bedrooms".into(), self.bedrooms.to_string()),
            ("bathrooms".into(), self.bathrooms.to_string()),
            ("parking_spaces".into(), self.parking.to_string()),
            ("bedroom_display".into(), self.bedroom_display.to_string()),
            ("available_date".into(), self.available.to_string()),
            ("inspection_times".into(), self.inspection_times.join("; ")),
            ("agency_name".into(), self.agent.agency_name.clone()),
            ("agent_name".into(), self.agent.agent_name.clone()),
            ("cover_image".into(), self.cover_image().to_string()),
            ("agent_phone".into(), self.agent.phone.clone()),
            ("agent_email".into(), self.agent.email.clone()),
            ("property_headline".into(), self.headline.clone()),
            ("property_description".into(), self.description.clone()),
        ];
        row.extend(self.features.columns());
        row.extend([
            ("latitude".into(), optional_number(loc.latitude)),
            ("longitude".into(), optional_number(loc.longitude)),
            ("images".into(), json_list(&self.images)),
            ("property_features".into(), json_list(&self.feature_bullets)),
            ("agent_profile_url".into(), self.agent.profile_url.clone()),
            ("agent_logo_url".into(), self.agent.logo_url.clone()),
            ("enquiry_form_action".into(), self.enquiry_form_action.clone()),
        ]);
        for i in 0..IMAGE_COLUMNS {
            row.push((
                format!("image_{}", i + 1),
                self.images.get(i).cloned().unwrap_or_default(),
            ));
        }
        row.push((
            "date_scraped".into(),
            self.scraped_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ));
        row
    }
}

fn optional_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_default()
}

/// Full expected column order: base columns, classified features, trailing
/// columns, then configuration-driven feature columns.
pub fn expected_columns(extra_feature_columns: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.extend(
        FeatureSet::default()
            .columns()
            .into_iter()
            .map(|(column, _)| column),
    );
    columns.extend(TRAILING_COLUMNS.iter().map(|c| c.to_string()));
    for column in extra_feature_columns {
        if !columns.contains(column) {
            columns.push(column.clone());
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_date_display() {
        assert_eq!(AvailableDate::Now.to_string(), "Available Now");
        let date = NaiveDate::from_ymd_opt(2099, 1, 1).unwrap();
        assert_eq!(AvailableDate::On(date).to_string(), "2099-01-01");
    }

    #[test]
    fn bedroom_display_strings() {
        assert_eq!(BedroomDisplay::Count(2).to_string(), "2");
        assert_eq!(BedroomDisplay::Studio.to_string(), "Studio");
        assert_eq!(BedroomDisplay::Unknown.to_string(), "");

        let row = ListingRecord::new("https://www.domain.com.au/1-a-st").to_row();
        let cell = row.iter().find(|(column, _)| column == "bedroom_display");
        assert_eq!(cell.map(|(_, value)| value.as_str()), Some(""));
    }

    #[test]
    fn validate_flags_problems_but_keeps_going() {
        let mut record = ListingRecord::new("");
        record.bathrooms = -1;
        record.location.latitude = Some(91.0);
        record.location.longitude = Some(151.2);

        let warnings = record.validate();
        assert!(warnings.contains(&ValidationWarning::MissingId));
        assert!(warnings.contains(&ValidationWarning::MissingUrl));
        assert!(warnings.contains(&ValidationWarning::Negative {
            field: "bathrooms",
            value: -1.0
        }));
        assert!(warnings.contains(&ValidationWarning::LatitudeOutOfRange(91.0)));
        assert_eq!(warnings.len(), 4);
    }

    #[test]
    fn clean_record_has_no_warnings() {
        let mut record = ListingRecord::new("https://www.domain.com.au/1-a-st-2019000001");
        record.id = "2019000001".into();
        record.location.latitude = Some(-33.86);
        record.location.longitude = Some(151.2);
        assert!(record.validate().is_empty());
    }

    #[test]
    fn row_contains_every_expected_column() {
        let mut record = ListingRecord::new("https://example.com/x");
        record.images = vec!["a.jpg".into(), "b.jpg".into()];
        let row = record.to_row();
        let columns: Vec<&str> = row.iter().map(|(c, _)| c.as_str()).collect();
        for expected in expected_columns(&[]) {
            assert!(columns.contains(&expected.as_str()), "missing {expected}");
        }
        let lookup = |name: &str| row.iter().find(|(c, _)| c == name).map(|(_, v)| v.clone());
        assert_eq!(lookup("cover_image").as_deref(), Some("a.jpg"));
        assert_eq!(lookup("image_2").as_deref(), Some("b.jpg"));
        assert_eq!(lookup("image_3").as_deref(), Some(""));
        assert_eq!(lookup("images").as_deref(), Some(r#"["a.jpg","b.jpg"]"#));
        assert_eq!(lookup("latitude").as_deref(), Some(""));
    }

    #[test]
    fn expected_columns_append_config_features_once() {
        let columns = expected_columns(&["has_fireplace".into(), "has_balcony".into()]);
        assert_eq!(columns.last().map(String::as_str), Some("has_fireplace"));
        assert_eq!(columns.iter().filter(|c| *c == "has_balcony").count(), 1);
        assert_eq!(columns[0], "listing_id");
    }
}

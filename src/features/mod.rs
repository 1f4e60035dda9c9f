//! Feature classification over listing free text.
//!
//! The classifier is pure: it holds an immutable [`KeywordConfig`] and turns
//! a lower-cased text blob into a [`FeatureSet`] without touching the network
//! or the filesystem.

pub mod keywords;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::models::{AirConditioningType, Amenity, FeatureSet, FurnishingStatus};

pub use keywords::{AirconKeywords, AirconTier, FeatureDefinition, FurnishingKeywords, KeywordConfig};

/// Built-in amenity patterns, matched case-insensitively against the blob.
fn builtin_patterns() -> &'static [(Amenity, Regex)] {
    static PATTERNS: OnceLock<Vec<(Amenity, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (Amenity::Balcony, r"balcony|terrace|deck|阳台"),
            (Amenity::Dishwasher, r"dishwasher|洗碗机"),
            (Amenity::Laundry, r"laundry|washer|dryer|洗衣|烘干机"),
            (
                Amenity::BuiltInWardrobe,
                r"built.{0,3}in|wardrobe|walk.?in robe|\brobes?\b|衣柜",
            ),
            (Amenity::Gym, r"gym|fitness|健身"),
            (Amenity::Pool, r"pool|swimming|游泳池"),
            (Amenity::Parking, r"parking|garage|car ?space|carport|停车"),
            (Amenity::PetsAllowed, r"pets?\s+allow|pet.?friendly|允许宠物|宠物友好"),
            (Amenity::Security, r"security|intercom|安保|门禁"),
            (Amenity::Storage, r"storage|储物"),
            (Amenity::Study, r"study|home office|书房|学习区"),
            (Amenity::Garden, r"garden|yard|花园|院子"),
        ]
        .into_iter()
        .map(|(amenity, pattern)| {
            let re = Regex::new(&format!("(?i){}", pattern)).expect("static pattern");
            (amenity, re)
        })
        .collect()
    })
}

/// Resolves furnishing, air conditioning and amenity flags from listing text.
#[derive(Debug, Clone)]
pub struct FeatureClassifier {
    config: KeywordConfig,
    /// Configured keywords that extend a core amenity.
    amenity_keywords: BTreeMap<Amenity, Vec<String>>,
    /// Configured extension features: column name to keywords.
    extra_keywords: Vec<(String, Vec<String>)>,
}

impl Default for FeatureClassifier {
    fn default() -> Self {
        Self::new(KeywordConfig::builtin())
    }
}

impl FeatureClassifier {
    pub fn new(config: KeywordConfig) -> Self {
        let mut amenity_keywords: BTreeMap<Amenity, Vec<String>> = BTreeMap::new();
        let mut extra_keywords = Vec::new();
        for def in &config.features {
            match Amenity::from_column(&def.column_name) {
                Some(amenity) => amenity_keywords
                    .entry(amenity)
                    .or_default()
                    .extend(def.keywords.iter().cloned()),
                None => extra_keywords.push((def.column_name.clone(), def.keywords.clone())),
            }
        }
        Self {
            config,
            amenity_keywords,
            extra_keywords,
        }
    }

    /// Column names of the configuration-driven extension flags.
    pub fn extra_columns(&self) -> Vec<String> {
        self.extra_keywords
            .iter()
            .map(|(column, _)| column.clone())
            .collect()
    }

    /// Classifies a listing from its description, feature bullets and
    /// structured feature names.
    pub fn classify(
        &self,
        description: &str,
        bullets: &[String],
        structured_names: &[String],
    ) -> FeatureSet {
        let mut parts: Vec<&str> = Vec::with_capacity(1 + bullets.len() + structured_names.len());
        parts.push(description);
        parts.extend(bullets.iter().map(String::as_str));
        parts.extend(structured_names.iter().map(String::as_str));
        self.classify_blob(&parts.join(" "))
    }

    /// Classifies one text blob. Matching is case-insensitive.
    pub fn classify_blob(&self, text: &str) -> FeatureSet {
        let blob = text.to_lowercase();

        let mut features = FeatureSet {
            furnishing: self.furnishing(&blob),
            air_conditioning: self.air_conditioning(&blob),
            ..FeatureSet::default()
        };

        for (amenity, pattern) in builtin_patterns() {
            let configured = self
                .amenity_keywords
                .get(amenity)
                .is_some_and(|keywords| contains_any(&blob, keywords));
            if configured || pattern.is_match(&blob) {
                features.amenities.set(*amenity, true);
            }
        }

        for (column, keywords) in &self.extra_keywords {
            features
                .extra
                .insert(column.clone(), contains_any(&blob, keywords));
        }

        features
    }

    /// Negative beats optional beats positive; nothing matching is unfurnished.
    fn furnishing(&self, blob: &str) -> FurnishingStatus {
        let keywords = &self.config.furnishing;
        if contains_any(blob, &keywords.negative) {
            FurnishingStatus::Unfurnished
        } else if contains_any(blob, &keywords.optional) {
            FurnishingStatus::Optional
        } else if contains_any(blob, &keywords.positive) {
            FurnishingStatus::Furnished
        } else {
            FurnishingStatus::Unfurnished
        }
    }

    /// First matching tier wins.
    fn air_conditioning(&self, blob: &str) -> AirConditioningType {
        for (tier, keywords) in &self.config.aircon.tiers {
            if let Some(hit) = keywords.iter().find(|k| blob.contains(k.as_str())) {
                debug!("Air conditioning tier {:?} matched {:?}", tier, hit);
                return match tier {
                    AirconTier::Negative => AirConditioningType::None,
                    AirconTier::Kind(kind) => *kind,
                };
            }
        }
        AirConditioningType::None
    }
}

fn contains_any<'a, I>(blob: &str, keywords: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    keywords.into_iter().any(|k| blob.contains(k.as_str()))
}

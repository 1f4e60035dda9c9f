//! Keyword configuration for the feature classifier.
//!
//! Three optional YAML files feed it:
//!
//! - `features_config.yaml`: `features: [{name, column_name, keywords}]`
//! - `furniture_keywords.yaml`: `negative_keywords`, `optional_keywords`,
//!   `positive_keywords`
//! - `aircon_keywords.yaml`: `negative_keywords`, `ducted_keywords`,
//!   `reverse_cycle_keywords`, `split_system_keywords`, `general_keywords`,
//!   `other_keywords`
//!
//! Each tier is either a flat list or a map of category to list. Any file that
//! is missing or malformed is replaced by a built-in reduced keyword set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::models::AirConditioningType;

/// A tier's keywords, flat or grouped by category.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeywordGroup {
    Flat(Vec<String>),
    Categorised(BTreeMap<String, Vec<String>>),
}

impl KeywordGroup {
    fn into_set(self) -> BTreeSet<String> {
        let all: Vec<String> = match self {
            Self::Flat(list) => list,
            Self::Categorised(map) => map.into_values().flatten().collect(),
        };
        normalize(all)
    }
}

/// Lower-cases, trims and de-duplicates keywords.
fn normalize<I, S>(keywords: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keywords
        .into_iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// One configuration-driven boolean feature.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FeatureDefinition {
    #[serde(default)]
    pub name: String,
    pub column_name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FeaturesFile {
    #[serde(default)]
    features: Vec<FeatureDefinition>,
}

#[derive(Debug, Default, Deserialize)]
struct FurnitureFile {
    negative_keywords: Option<KeywordGroup>,
    optional_keywords: Option<KeywordGroup>,
    positive_keywords: Option<KeywordGroup>,
}

#[derive(Debug, Default, Deserialize)]
struct AirconFile {
    negative_keywords: Option<KeywordGroup>,
    ducted_keywords: Option<KeywordGroup>,
    reverse_cycle_keywords: Option<KeywordGroup>,
    split_system_keywords: Option<KeywordGroup>,
    general_keywords: Option<KeywordGroup>,
    other_keywords: Option<KeywordGroup>,
}

/// Furnishing tiers. Negative beats optional beats positive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FurnishingKeywords {
    pub negative: BTreeSet<String>,
    pub optional: BTreeSet<String>,
    pub positive: BTreeSet<String>,
}

impl FurnishingKeywords {
    pub fn builtin() -> Self {
        Self {
            negative: normalize(["unfurnished", "not furnished", "no furniture"]),
            optional: normalize([
                "partly furnished",
                "semi-furnished",
                "semi furnished",
                "optional furniture",
                "furniture optional",
            ]),
            positive: normalize(["furnished", "fully furnished", "incl. furniture"]),
        }
    }

    fn from_file(file: FurnitureFile) -> Self {
        Self {
            negative: file.negative_keywords.map(KeywordGroup::into_set).unwrap_or_default(),
            optional: file.optional_keywords.map(KeywordGroup::into_set).unwrap_or_default(),
            positive: file.positive_keywords.map(KeywordGroup::into_set).unwrap_or_default(),
        }
    }

    fn len(&self) -> usize {
        self.negative.len() + self.optional.len() + self.positive.len()
    }
}

/// What an air-conditioning tier resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirconTier {
    /// Explicitly no air conditioning.
    Negative,
    Kind(AirConditioningType),
}

/// Air-conditioning tiers in priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct AirconKeywords {
    pub tiers: Vec<(AirconTier, BTreeSet<String>)>,
}

impl AirconKeywords {
    pub fn builtin() -> Self {
        Self {
            tiers: vec![
                (
                    AirconTier::Negative,
                    normalize([
                        "no air conditioning",
                        "no air-conditioning",
                        "no aircon",
                        "no air con",
                    ]),
                ),
                (
                    AirconTier::Kind(AirConditioningType::Ducted),
                    normalize(["ducted", "central air"]),
                ),
                (
                    AirconTier::Kind(AirConditioningType::ReverseCycle),
                    normalize(["reverse cycle", "reverse-cycle"]),
                ),
                (
                    AirconTier::Kind(AirConditioningType::SplitSystem),
                    normalize(["split system", "split-system"]),
                ),
                (
                    AirconTier::Kind(AirConditioningType::General),
                    normalize([
                        "air conditioning",
                        "air-conditioning",
                        "air conditioner",
                        "air con",
                        "air-con",
                        "aircon",
                    ]),
                ),
                (
                    AirconTier::Kind(AirConditioningType::Other),
                    normalize(["evaporative cooling", "climate control"]),
                ),
            ],
        }
    }

    fn from_file(file: AirconFile) -> Self {
        let tiers = [
            (AirconTier::Negative, file.negative_keywords),
            (
                AirconTier::Kind(AirConditioningType::Ducted),
                file.ducted_keywords,
            ),
            (
                AirconTier::Kind(AirConditioningType::ReverseCycle),
                file.reverse_cycle_keywords,
            ),
            (
                AirconTier::Kind(AirConditioningType::SplitSystem),
                file.split_system_keywords,
            ),
            (
                AirconTier::Kind(AirConditioningType::General),
                file.general_keywords,
            ),
            (
                AirconTier::Kind(AirConditioningType::Other),
                file.other_keywords,
            ),
        ]
        .into_iter()
        .filter_map(|(tier, group)| group.map(|g| (tier, g.into_set())))
        .filter(|(_, set)| !set.is_empty())
        .collect();
        Self { tiers }
    }

    fn len(&self) -> usize {
        self.tiers.iter().map(|(_, set)| set.len()).sum()
    }
}

impl Default for AirconKeywords {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Immutable keyword configuration handed to the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordConfig {
    pub furnishing: FurnishingKeywords,
    pub aircon: AirconKeywords,
    pub features: Vec<FeatureDefinition>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KeywordConfig {
    /// The reduced built-in keyword set.
    pub fn builtin() -> Self {
        Self {
            furnishing: FurnishingKeywords::builtin(),
            aircon: AirconKeywords::builtin(),
            features: Vec::new(),
        }
    }

    /// Loads all three files, falling back per file to the built-ins.
    pub fn load(features_path: &Path, furniture_path: &Path, aircon_path: &Path) -> Self {
        let features = match read_yaml::<FeaturesFile>(features_path) {
            Ok(Some(file)) => dedupe_features(file.features),
            Ok(None) => {
                warn!(
                    "Features config {} not found, no extra features",
                    features_path.display()
                );
                Vec::new()
            }
            Err(e) => {
                warn!("{}; no extra features", e);
                Vec::new()
            }
        };

        let furnishing = match read_yaml::<FurnitureFile>(furniture_path) {
            Ok(Some(file)) => FurnishingKeywords::from_file(file),
            Ok(None) => {
                warn!(
                    "Furniture keywords {} not found, using fallback keywords",
                    furniture_path.display()
                );
                FurnishingKeywords::builtin()
            }
            Err(e) => {
                warn!("{}; using fallback furniture keywords", e);
                FurnishingKeywords::builtin()
            }
        };

        let aircon = match read_yaml::<AirconFile>(aircon_path) {
            Ok(Some(file)) => AirconKeywords::from_file(file),
            Ok(None) => {
                warn!(
                    "Aircon keywords {} not found, using fallback keywords",
                    aircon_path.display()
                );
                AirconKeywords::builtin()
            }
            Err(e) => {
                warn!("{}; using fallback aircon keywords", e);
                AirconKeywords::builtin()
            }
        };

        let config = Self {
            furnishing,
            aircon,
            features,
        };
        info!(
            "Loaded {} furniture keywords, {} aircon keywords across {} tiers, {} configured features",
            config.furnishing.len(),
            config.aircon.len(),
            config.aircon.tiers.len(),
            config.features.len()
        );
        config
    }

    /// Builds a config from YAML strings. Used by tests and embedders.
    pub fn from_yaml(
        features: Option<&str>,
        furniture: Option<&str>,
        aircon: Option<&str>,
    ) -> Result<Self, serde_yml::Error> {
        let features = match features {
            Some(text) => dedupe_features(serde_yml::from_str::<FeaturesFile>(text)?.features),
            None => Vec::new(),
        };
        let furnishing = match furniture {
            Some(text) => FurnishingKeywords::from_file(serde_yml::from_str(text)?),
            None => FurnishingKeywords::builtin(),
        };
        let aircon = match aircon {
            Some(text) => AirconKeywords::from_file(serde_yml::from_str(text)?),
            None => AirconKeywords::builtin(),
        };
        Ok(Self {
            furnishing,
            aircon,
            features,
        })
    }
}

/// Merges entries sharing a column name and drops case-insensitive
/// duplicate keywords.
fn dedupe_features(defs: Vec<FeatureDefinition>) -> Vec<FeatureDefinition> {
    let mut merged: Vec<FeatureDefinition> = Vec::new();
    for def in defs {
        let column = def.column_name.trim().to_string();
        if column.is_empty() {
            continue;
        }
        let keywords = normalize(def.keywords);
        match merged.iter_mut().find(|m| m.column_name == column) {
            Some(existing) => {
                let mut all = normalize(existing.keywords.drain(..));
                all.extend(keywords);
                existing.keywords = all.into_iter().collect();
            }
            None => merged.push(FeatureDefinition {
                name: def.name,
                column_name: column,
                keywords: keywords.into_iter().collect(),
            }),
        }
    }
    merged
}

/// `Ok(None)` when the file does not exist.
fn read_yaml<T: serde::de::DeserializeOwned + Default>(
    path: &Path,
) -> Result<Option<T>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(Some(T::default()));
    }
    serde_yml::from_str(&text)
        .map(Some)
        .map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
}

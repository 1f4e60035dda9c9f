use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Furnishing status of a listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FurnishingStatus {
    Furnished,
    #[default]
    Unfurnished,
    /// Furniture offered as an option.
    Optional,
}

impl FurnishingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Furnished => "furnished",
            Self::Unfurnished => "unfurnished",
            Self::Optional => "optional",
        }
    }
}

impl fmt::Display for FurnishingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Air-conditioning category, in classification priority order after `None`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AirConditioningType {
    #[default]
    None,
    Ducted,
    ReverseCycle,
    SplitSystem,
    General,
    Other,
}

impl AirConditioningType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ducted => "ducted",
            Self::ReverseCycle => "reverse_cycle",
            Self::SplitSystem => "split_system",
            Self::General => "general",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AirConditioningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of amenities every listing is classified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Amenity {
    Balcony,
    Dishwasher,
    Laundry,
    BuiltInWardrobe,
    Gym,
    Pool,
    Parking,
    PetsAllowed,
    Security,
    Storage,
    Study,
    Garden,
}

impl Amenity {
    pub const ALL: [Amenity; 12] = [
        Amenity::Balcony,
        Amenity::Dishwasher,
        Amenity::Laundry,
        Amenity::BuiltInWardrobe,
        Amenity::Gym,
        Amenity::Pool,
        Amenity::Parking,
        Amenity::PetsAllowed,
        Amenity::Security,
        Amenity::Storage,
        Amenity::Study,
        Amenity::Garden,
    ];

    /// Output column name.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Balcony => "has_balcony",
            Self::Dishwasher => "has_dishwasher",
            Self::Laundry => "has_laundry",
            Self::BuiltInWardrobe => "has_built_in_wardrobe",
            Self::Gym => "has_gym",
            Self::Pool => "has_pool",
            Self::Parking => "has_parking",
            Self::PetsAllowed => "allows_pets",
            Self::Security => "has_security_system",
            Self::Storage => "has_storage",
            Self::Study => "has_study_room",
            Self::Garden => "has_garden",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.column() == column)
    }
}

/// Boolean flags for the core amenities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Amenities {
    pub balcony: bool,
    pub dishwasher: bool,
    pub laundry: bool,
    pub built_in_wardrobe: bool,
    pub gym: bool,
    pub pool: bool,
    pub parking: bool,
    pub pets_allowed: bool,
    pub security: bool,
    pub storage: bool,
    pub study: bool,
    pub garden: bool,
}

impl Amenities {
    fn slot(&mut self, amenity: Amenity) -> &mut bool {
        match amenity {
            Amenity::Balcony => &mut self.balcony,
            Amenity::Dishwasher => &mut self.dishwasher,
            Amenity::Laundry => &mut self.laundry,
            Amenity::BuiltInWardrobe => &mut self.built_in_wardrobe,
            Amenity::Gym => &mut self.gym,
            Amenity::Pool => &mut self.pool,
            Amenity::Parking => &mut self.parking,
            Amenity::PetsAllowed => &mut self.pets_allowed,
            Amenity::Security => &mut self.security,
            Amenity::Storage => &mut self.storage,
            Amenity::Study => &mut self.study,
            Amenity::Garden => &mut self.garden,
        }
    }

    pub fn set(&mut self, amenity: Amenity, value: bool) {
        *self.slot(amenity) = value;
    }

    pub fn get(&self, amenity: Amenity) -> bool {
        match amenity {
            Amenity::Balcony => self.balcony,
            Amenity::Dishwasher => self.dishwasher,
            Amenity::Laundry => self.laundry,
            Amenity::BuiltInWardrobe => self.built_in_wardrobe,
            Amenity::Gym => self.gym,
            Amenity::Pool => self.pool,
            Amenity::Parking => self.parking,
            Amenity::PetsAllowed => self.pets_allowed,
            Amenity::Security => self.security,
            Amenity::Storage => self.storage,
            Amenity::Study => self.study,
            Amenity::Garden => self.garden,
        }
    }
}

/// Classified features of a listing. Only ever produced alongside its record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSet {
    pub furnishing: FurnishingStatus,
    pub air_conditioning: AirConditioningType,
    pub amenities: Amenities,
    /// Configuration-driven flags keyed by output column name.
    pub extra: BTreeMap<String, bool>,
}

impl FeatureSet {
    pub fn has_air_conditioning(&self) -> bool {
        self.air_conditioning != AirConditioningType::None
    }

    /// Column/value pairs in output order.
    pub fn columns(&self) -> Vec<(String, String)> {
        let mut out = vec![
            ("furnishing_status".to_string(), self.furnishing.to_string()),
            (
                "has_air_conditioning".to_string(),
                self.has_air_conditioning().to_string(),
            ),
            (
                "air_conditioning_type".to_string(),
                self.air_conditioning.to_string(),
            ),
        ];
        for amenity in Amenity::ALL {
            out.push((
                amenity.column().to_string(),
                self.amenities.get(amenity).to_string(),
            ));
        }
        for (column, value) in &self.extra {
            out.push((column.clone(), value.to_string()));
        }
        out
    }
}

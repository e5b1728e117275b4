use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{lookup::LookupService, store::DatabaseStore};

/// Application state shared across API handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DatabaseStore>,
    pub lookup: LookupService,
}

impl AppState {
    pub fn new(store: Arc<DatabaseStore>) -> Self {
        Self {
            lookup: LookupService::new(store.clone()),
            store,
        }
    }
}

/// Type alias for the application state that can be used with Axum
pub type SharedState = State<AppState>;

/// Identifies the database currently served to lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseHandle {
    pub path: PathBuf,
    pub loaded_at: DateTime<Utc>,
    pub version: u64,
}

/// Result of a single refresh attempt
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl RefreshOutcome {
    pub fn succeeded(size: u64) -> Self {
        Self {
            success: true,
            timestamp: Utc::now(),
            error: None,
            size: Some(size),
        }
    }

    pub fn failed(reason: impl ToString) -> Self {
        Self {
            success: false,
            timestamp: Utc::now(),
            error: Some(reason.to_string()),
            size: None,
        }
    }
}

/// Status report returned by the health endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database_available: bool,
    pub database_version: Option<u64>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_refresh: Option<RefreshOutcome>,
}

/// Groups whose fields are all optional and which drop out of responses when empty
pub trait Prune {
    fn is_empty(&self) -> bool;
}

/// Keep a group only if at least one of its fields is present
pub fn prune_group<T: Prune>(group: Option<T>) -> Option<T> {
    group.filter(|g| !g.is_empty())
}

/// Geolocation result for a single address
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<City>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal: Option<Postal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continent: Option<Continent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<Country>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_country: Option<Country>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traits: Option<Traits>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subdivisions: Vec<Subdivision>,
}

impl GeoRecord {
    /// Drop every absent group, and every subdivision with no fields
    pub fn pruned(self) -> Self {
        GeoRecord {
            ip: self.ip.filter(|ip| !ip.is_empty()),
            location: prune_group(self.location),
            city: prune_group(self.city),
            postal: prune_group(self.postal),
            continent: prune_group(self.continent),
            country: prune_group(self.country),
            registered_country: prune_group(self.registered_country),
            traits: prune_group(self.traits),
            subdivisions: self
                .subdivisions
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_radius: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl Prune for Location {
    fn is_empty(&self) -> bool {
        self.latitude.is_none()
            && self.longitude.is_none()
            && self.accuracy_radius.is_none()
            && self.time_zone.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct City {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoname_id: Option<u32>,
}

impl Prune for City {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.geoname_id.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Postal {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Prune for Postal {
    fn is_empty(&self) -> bool {
        self.code.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Continent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoname_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Prune for Continent {
    fn is_empty(&self) -> bool {
        self.code.is_none() && self.geoname_id.is_none() && self.name.is_none()
    }
}

/// Shared shape of `country` and `registered_country`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Country {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoname_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_in_european_union: Option<bool>,
}

impl Prune for Country {
    fn is_empty(&self) -> bool {
        self.iso_code.is_none()
            && self.geoname_id.is_none()
            && self.name.is_none()
            && self.is_in_european_union.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Traits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_anonymous_proxy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_satellite_provider: Option<bool>,
}

impl Prune for Traits {
    fn is_empty(&self) -> bool {
        self.is_anonymous_proxy.is_none() && self.is_satellite_provider.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subdivision {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoname_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Prune for Subdivision {
    fn is_empty(&self) -> bool {
        self.iso_code.is_none() && self.geoname_id.is_none() && self.name.is_none()
    }
}

use maxminddb::geoip2;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    error::AppError,
    models::{City, Continent, Country, GeoRecord, Location, Postal, Subdivision, Traits},
    store::DatabaseStore,
};

/// Resolves addresses against the active database
#[derive(Clone)]
pub struct LookupService {
    store: Arc<DatabaseStore>,
}

impl LookupService {
    pub fn new(store: Arc<DatabaseStore>) -> Self {
        Self { store }
    }

    /// Look up a textual IPv4 or IPv6 address
    pub fn lookup(&self, address: &str) -> Result<GeoRecord, AppError> {
        let ip = parse_address(address)?;

        let db = self.store.current().ok_or(AppError::ServiceUnavailable)?;
        let city: geoip2::City = db.reader.lookup(ip)?;

        Ok(to_record(address, &city).pruned())
    }
}

/// Validate that `text` is a literal IPv4 or IPv6 address
pub fn parse_address(text: &str) -> Result<IpAddr, AppError> {
    IpAddr::from_str(text).map_err(|_| AppError::InvalidInput(text.to_string()))
}

fn english(names: &Option<BTreeMap<&str, &str>>) -> Option<String> {
    names
        .as_ref()
        .and_then(|names| names.get("en"))
        .map(|name| name.to_string())
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

fn to_record(address: &str, city: &geoip2::City) -> GeoRecord {
    GeoRecord {
        ip: Some(address.to_string()),
        location: city.location.as_ref().map(|l| Location {
            latitude: l.latitude,
            longitude: l.longitude,
            accuracy_radius: l.accuracy_radius,
            time_zone: owned(l.time_zone),
        }),
        city: city.city.as_ref().map(|c| City {
            name: english(&c.names),
            geoname_id: c.geoname_id,
        }),
        postal: city.postal.as_ref().map(|p| Postal {
            code: owned(p.code),
        }),
        continent: city.continent.as_ref().map(|c| Continent {
            code: owned(c.code),
            geoname_id: c.geoname_id,
            name: english(&c.names),
        }),
        country: city.country.as_ref().map(|c| Country {
            iso_code: owned(c.iso_code),
            geoname_id: c.geoname_id,
            name: english(&c.names),
            is_in_european_union: c.is_in_european_union,
        }),
        registered_country: city.registered_country.as_ref().map(|c| Country {
            iso_code: owned(c.iso_code),
            geoname_id: c.geoname_id,
            name: english(&c.names),
            is_in_european_union: c.is_in_european_union,
        }),
        traits: city.traits.as_ref().map(|t| Traits {
            is_anonymous_proxy: t.is_anonymous_proxy,
            is_satellite_provider: t.is_satellite_provider,
        }),
        subdivisions: city
            .subdivisions
            .iter()
            .flatten()
            .map(|s| Subdivision {
                iso_code: owned(s.iso_code),
                geoname_id: s.geoname_id,
                name: english(&s.names),
            })
            .collect(),
    }
}

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use maxminddb::{geoip2, Reader};
use crate::config::GeoConfig;

/// Best-effort location of a public address. Every field is independently
/// optional except the coordinates, which are kept or dropped as a pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoRecord {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
}

impl GeoRecord {
    /// Drop a half-known coordinate pair
    fn with_paired_coordinates(mut self) -> Self {
        if self.latitude.is_none() || self.longitude.is_none() {
            self.latitude = None;
            self.longitude = None;
        }
        self
    }

    /// "city, region, country" from whichever parts are known
    pub fn label(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.city, &self.region, &self.country]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Address-to-location lookup. A miss is an all-null record, never an error.
pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: IpAddr) -> GeoRecord;
}

/// Used when no database is configured
pub struct NoGeo;

impl GeoLocator for NoGeo {
    fn locate(&self, _ip: IpAddr) -> GeoRecord {
        GeoRecord::default()
    }
}

/// Lookup against a MaxMind GeoLite2/GeoIP2 City database held in memory
pub struct MaxMindGeo {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeo {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, maxminddb::MaxMindDBError> {
        let reader = Reader::open_readfile(db_path)?;
        Ok(Self { reader })
    }
}

impl GeoLocator for MaxMindGeo {
    fn locate(&self, ip: IpAddr) -> GeoRecord {
        let city: geoip2::City = match self.reader.lookup(ip) {
            Ok(city) => city,
            Err(e) => {
                tracing::debug!("No geolocation for {}: {}", ip, e);
                return GeoRecord::default();
            }
        };

        let country = city
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(|s| s.to_string());

        let city_name = city
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en"))
            .map(|s| s.to_string());

        let region = city
            .subdivisions
            .as_ref()
            .and_then(|s| s.first())
            .and_then(|s| s.names.as_ref())
            .and_then(|n| n.get("en"))
            .map(|s| s.to_string());

        let (latitude, longitude, timezone) = city
            .location
            .as_ref()
            .map(|loc| (loc.latitude, loc.longitude, loc.time_zone.map(|tz| tz.to_string())))
            .unwrap_or((None, None, None));

        GeoRecord {
            country,
            region,
            city: city_name,
            latitude,
            longitude,
            timezone,
        }
        .with_paired_coordinates()
    }
}

/// Build the locator for the configured database, degrading to `NoGeo`
/// when it is unset or cannot be opened.
pub fn from_config(config: &GeoConfig) -> Arc<dyn GeoLocator> {
    let Some(path) = &config.db_path else {
        tracing::info!("No geolocation database configured");
        return Arc::new(NoGeo);
    };

    match MaxMindGeo::open(path) {
        Ok(geo) => {
            tracing::info!("Opened geolocation database at {}", path.display());
            Arc::new(geo)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to open geolocation database {}: {}; continuing without geolocation",
                path.display(),
                e
            );
            Arc::new(NoGeo)
        }
    }
}

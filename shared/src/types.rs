use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// One line of traceroute output, as parsed.
/// This is the record returned to callers of the traceroute API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    /// Hop number as reported by the tool (not renumbered)
    pub hop: u32,

    /// Responding address, absent for timeouts
    pub ip: Option<String>,

    /// Reverse-resolved name printed by the tool, if any
    pub hostname: Option<String>,

    /// Round-trip samples in milliseconds, verbatim from the output
    pub rtt: Vec<String>,
}

impl Hop {
    /// A hop line that only carried timeout markers
    pub fn timeout(hop: u32) -> Self {
        Self {
            hop,
            ip: None,
            hostname: None,
            rtt: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Map placement, only when both halves of the pair are known
    pub fn from_pair(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self { lat, lng }),
            _ => None,
        }
    }
}

/// A network node, unique by address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub id: i64,
    pub address: String,
    pub hostname: Option<String>,
    pub asn: Option<i64>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Router listing entry annotated with its link count in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSummary {
    #[serde(flatten)]
    pub router: Router,
    pub degree: u64,
}

/// The machine that ran the traceroute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSystem {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// History listing entry for one traceroute run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSummary {
    pub id: i64,
    pub target_address: String,
    pub target_hostname: Option<String>,
    pub system_name: String,
    pub created_at: DateTime<Utc>,
    pub link_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub id: i64,
    pub address: String,
    pub hostname: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDetail {
    pub sequence: u32,
    pub source: LinkEndpoint,
    pub destination: LinkEndpoint,
    pub rtt: Option<f64>,
}

/// A stored traceroute run with its links in hop order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathDetail {
    pub id: i64,
    pub target_address: String,
    pub target_hostname: Option<String>,
    pub system_name: String,
    pub created_at: DateTime<Utc>,
    pub links: Vec<LinkDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRouter {
    pub id: i64,
    pub address: String,
    pub hostname: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub degree: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEndpoint {
    pub id: i64,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLink {
    pub id: i64,
    pub sequence: u32,
    pub rtt: Option<f64>,
    pub source: MapEndpoint,
    pub destination: MapEndpoint,
}

/// Geolocated slice of the topology, ready to draw.
/// Links only appear when both endpoints have coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapProjection {
    pub routers: Vec<MapRouter>,
    pub links: Vec<MapLink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_need_both_halves() {
        assert_eq!(
            Coordinates::from_pair(Some(52.37), Some(4.89)),
            Some(Coordinates { lat: 52.37, lng: 4.89 })
        );
        assert_eq!(Coordinates::from_pair(Some(52.37), None), None);
        assert_eq!(Coordinates::from_pair(None, Some(4.89)), None);
    }
}

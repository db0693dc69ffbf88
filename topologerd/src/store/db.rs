use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{
    Coordinates, LinkDetail, LinkEndpoint, MapEndpoint, MapLink, MapProjection, MapRouter,
    MeasurementSystem, PathDetail, PathSummary, Router, RouterSummary,
};
use crate::config::SystemConfig;
use crate::geo::GeoRecord;

const ROUTER_COLUMNS: &str = "id, address, hostname, asn, country, region, city,
    latitude, longitude, timezone, created_at, updated_at";

/// Links where the router is source plus links where it is destination
const ROUTER_DEGREE: &str = "(SELECT COUNT(*) FROM links WHERE links.source_id = routers.id)
    + (SELECT COUNT(*) FROM links WHERE links.destination_id = routers.id)";

/// A public hop's router as observed in one run
#[derive(Debug, Clone, Default)]
pub struct RouterUpsert {
    pub address: String,
    pub hostname: Option<String>,
    pub geo: GeoRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLink {
    pub sequence: u32,
    pub source_id: i64,
    pub destination_id: i64,
    pub rtt: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewPath {
    pub system_id: i64,
    pub target_address: String,
    pub target_hostname: Option<String>,
    pub links: Vec<NewLink>,
}

#[derive(Debug, Clone, Default)]
pub struct RouterFilter {
    pub country: Option<String>,
    /// Case-insensitive substring of the city name
    pub city: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    /// Substring of the target address or hostname
    pub target: Option<String>,
    pub limit: u32,
}

pub struct TopologyDb {
    conn: Connection,
}

impl TopologyDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("Failed to configure database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS measurement_systems (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                address     TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS routers (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                address     TEXT NOT NULL UNIQUE,
                hostname    TEXT,
                asn         INTEGER,
                country     TEXT,
                region      TEXT,
                city        TEXT,
                latitude    REAL,
                longitude   REAL,
                timezone    TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS paths (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                system_id       INTEGER NOT NULL REFERENCES measurement_systems(id),
                target_address  TEXT NOT NULL,
                target_hostname TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS links (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                path_id        INTEGER NOT NULL REFERENCES paths(id) ON DELETE CASCADE,
                sequence       INTEGER NOT NULL,
                source_id      INTEGER NOT NULL REFERENCES routers(id),
                destination_id INTEGER NOT NULL REFERENCES routers(id),
                rtt            REAL
            );

            CREATE INDEX IF NOT EXISTS idx_router_country ON routers(country);
            CREATE INDEX IF NOT EXISTS idx_link_path ON links(path_id, sequence);
            CREATE INDEX IF NOT EXISTS idx_link_source ON links(source_id);
            CREATE INDEX IF NOT EXISTS idx_link_destination ON links(destination_id);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Get or create the measurement system keyed by its address.
    /// An existing row is returned unchanged.
    pub fn ensure_system(&self, system: &SystemConfig) -> Result<MeasurementSystem> {
        self.conn.execute(
            "INSERT INTO measurement_systems (name, address, description, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(address) DO NOTHING",
            params![&system.name, &system.address, &system.description, timestamp(Utc::now())],
        )
        .context("Failed to insert measurement system")?;

        self.conn
            .query_row(
                "SELECT id, name, address, description, created_at
                 FROM measurement_systems WHERE address = ?1",
                params![&system.address],
                |row| {
                    Ok(MeasurementSystem {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        address: row.get(2)?,
                        description: row.get(3)?,
                        created_at: parse_timestamp(row, 4)?,
                    })
                },
            )
            .context("Failed to query measurement system")
    }

    /// Insert a router or merge into the existing row for its address.
    /// Incoming nulls never clear known fields; coordinates move as a pair.
    pub fn upsert_router(&self, router: &RouterUpsert) -> Result<Router> {
        let now = timestamp(Utc::now());
        let geo = &router.geo;
        let (latitude, longitude) = match (geo.latitude, geo.longitude) {
            (Some(lat), Some(lng)) => (Some(lat), Some(lng)),
            _ => (None, None),
        };

        self.conn
            .query_row(
                &format!(
                    r#"
                    INSERT INTO routers (
                        address, hostname, country, region, city,
                        latitude, longitude, timezone, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                    ON CONFLICT(address) DO UPDATE SET
                        hostname = COALESCE(excluded.hostname, routers.hostname),
                        country = COALESCE(excluded.country, routers.country),
                        region = COALESCE(excluded.region, routers.region),
                        city = COALESCE(excluded.city, routers.city),
                        latitude = COALESCE(excluded.latitude, routers.latitude),
                        longitude = COALESCE(excluded.longitude, routers.longitude),
                        timezone = COALESCE(excluded.timezone, routers.timezone),
                        updated_at = excluded.updated_at
                    RETURNING {ROUTER_COLUMNS}
                    "#
                ),
                params![
                    &router.address,
                    &router.hostname,
                    &geo.country,
                    &geo.region,
                    &geo.city,
                    latitude,
                    longitude,
                    &geo.timezone,
                    now,
                ],
                row_to_router,
            )
            .with_context(|| format!("Failed to upsert router {}", router.address))
    }

    /// Write a path and all of its links in one transaction.
    pub fn create_path(&self, path: &NewPath) -> Result<i64> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        tx.execute(
            "INSERT INTO paths (system_id, target_address, target_hostname, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                path.system_id,
                &path.target_address,
                &path.target_hostname,
                timestamp(Utc::now()),
            ],
        )
        .context("Failed to insert path")?;
        let path_id = tx.last_insert_rowid();

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO links (path_id, sequence, source_id, destination_id, rtt)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .context("Failed to prepare link insert")?;

            for link in &path.links {
                stmt.execute(params![
                    path_id,
                    link.sequence,
                    link.source_id,
                    link.destination_id,
                    link.rtt,
                ])
                .with_context(|| format!("Failed to insert link {}", link.sequence))?;
            }
        }

        tx.commit().context("Failed to commit path")?;
        Ok(path_id)
    }

    /// Get one path with its links in hop order
    pub fn get_path(&self, id: i64) -> Result<Option<PathDetail>> {
        let header = self
            .conn
            .query_row(
                "SELECT p.id, p.target_address, p.target_hostname, m.name, p.created_at
                 FROM paths p JOIN measurement_systems m ON m.id = p.system_id
                 WHERE p.id = ?1",
                params![id],
                |row| {
                    Ok(PathDetail {
                        id: row.get(0)?,
                        target_address: row.get(1)?,
                        target_hostname: row.get(2)?,
                        system_name: row.get(3)?,
                        created_at: parse_timestamp(row, 4)?,
                        links: Vec::new(),
                    })
                },
            )
            .optional()
            .context("Failed to query path")?;

        let Some(mut path) = header else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT l.sequence, l.rtt,
                        s.id, s.address, s.hostname, s.country, s.region, s.city, s.latitude, s.longitude,
                        d.id, d.address, d.hostname, d.country, d.region, d.city, d.latitude, d.longitude
                 FROM links l
                 JOIN routers s ON s.id = l.source_id
                 JOIN routers d ON d.id = l.destination_id
                 WHERE l.path_id = ?1
                 ORDER BY l.sequence, l.id",
            )
            .context("Failed to prepare query")?;

        path.links = stmt
            .query_map(params![id], |row| {
                Ok(LinkDetail {
                    sequence: row.get(0)?,
                    rtt: row.get(1)?,
                    source: row_to_endpoint(row, 2)?,
                    destination: row_to_endpoint(row, 10)?,
                })
            })
            .context("Failed to query links")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect links")?;

        Ok(Some(path))
    }

    /// Most recent paths first
    pub fn list_paths(&self, filter: &PathFilter) -> Result<Vec<PathSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.target_address, p.target_hostname, m.name, p.created_at,
                        (SELECT COUNT(*) FROM links l WHERE l.path_id = p.id)
                 FROM paths p JOIN measurement_systems m ON m.id = p.system_id
                 WHERE ?1 IS NULL
                    OR instr(p.target_address, ?1) > 0
                    OR instr(p.target_hostname, ?1) > 0
                 ORDER BY p.id DESC
                 LIMIT ?2",
            )
            .context("Failed to prepare query")?;

        let paths = stmt
            .query_map(params![&filter.target, filter.limit], |row| {
                Ok(PathSummary {
                    id: row.get(0)?,
                    target_address: row.get(1)?,
                    target_hostname: row.get(2)?,
                    system_name: row.get(3)?,
                    created_at: parse_timestamp(row, 4)?,
                    link_count: row.get::<_, i64>(5)? as u64,
                })
            })
            .context("Failed to query paths")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect paths")?;

        Ok(paths)
    }

    /// Routers newest first, each with its degree
    pub fn list_routers(&self, filter: &RouterFilter) -> Result<Vec<RouterSummary>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ROUTER_COLUMNS}, {ROUTER_DEGREE}
                 FROM routers
                 WHERE (?1 IS NULL OR country = ?1)
                   AND (?2 IS NULL OR instr(lower(city), lower(?2)) > 0)
                 ORDER BY id DESC
                 LIMIT ?3"
            ))
            .context("Failed to prepare query")?;

        let routers = stmt
            .query_map(params![&filter.country, &filter.city, filter.limit], |row| {
                Ok(RouterSummary {
                    router: row_to_router(row)?,
                    degree: row.get::<_, i64>(12)? as u64,
                })
            })
            .context("Failed to query routers")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect routers")?;

        Ok(routers)
    }

    /// Geolocated routers and the links between them
    pub fn map_projection(&self) -> Result<MapProjection> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, address, hostname, country, region, city, latitude, longitude, {ROUTER_DEGREE}
                 FROM routers
                 WHERE latitude IS NOT NULL AND longitude IS NOT NULL
                 ORDER BY id"
            ))
            .context("Failed to prepare query")?;

        let routers = stmt
            .query_map([], |row| {
                Ok(MapRouter {
                    id: row.get(0)?,
                    address: row.get(1)?,
                    hostname: row.get(2)?,
                    country: row.get(3)?,
                    region: row.get(4)?,
                    city: row.get(5)?,
                    latitude: row.get(6)?,
                    longitude: row.get(7)?,
                    degree: row.get::<_, i64>(8)? as u64,
                })
            })
            .context("Failed to query map routers")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect map routers")?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT l.id, l.sequence, l.rtt,
                        s.id, s.address, s.latitude, s.longitude,
                        d.id, d.address, d.latitude, d.longitude
                 FROM links l
                 JOIN routers s ON s.id = l.source_id
                 JOIN routers d ON d.id = l.destination_id
                 WHERE s.latitude IS NOT NULL AND s.longitude IS NOT NULL
                   AND d.latitude IS NOT NULL AND d.longitude IS NOT NULL
                 ORDER BY l.id",
            )
            .context("Failed to prepare query")?;

        let links = stmt
            .query_map([], |row| {
                Ok(MapLink {
                    id: row.get(0)?,
                    sequence: row.get(1)?,
                    rtt: row.get(2)?,
                    source: MapEndpoint {
                        id: row.get(3)?,
                        address: row.get(4)?,
                        latitude: row.get(5)?,
                        longitude: row.get(6)?,
                    },
                    destination: MapEndpoint {
                        id: row.get(7)?,
                        address: row.get(8)?,
                        latitude: row.get(9)?,
                        longitude: row.get(10)?,
                    },
                })
            })
            .context("Failed to query map links")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect map links")?;

        Ok(MapProjection { routers, links })
    }
}

/// Fixed-width RFC 3339 so stored timestamps compare lexically
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
}

/// Expects `ROUTER_COLUMNS` order
fn row_to_router(row: &rusqlite::Row) -> Result<Router, rusqlite::Error> {
    Ok(Router {
        id: row.get(0)?,
        address: row.get(1)?,
        hostname: row.get(2)?,
        asn: row.get(3)?,
        country: row.get(4)?,
        region: row.get(5)?,
        city: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        timezone: row.get(9)?,
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
    })
}

/// Eight router columns starting at `offset`:
/// id, address, hostname, country, region, city, latitude, longitude
fn row_to_endpoint(row: &rusqlite::Row, offset: usize) -> Result<LinkEndpoint, rusqlite::Error> {
    let latitude: Option<f64> = row.get(offset + 6)?;
    let longitude: Option<f64> = row.get(offset + 7)?;

    Ok(LinkEndpoint {
        id: row.get(offset)?,
        address: row.get(offset + 1)?,
        hostname: row.get(offset + 2)?,
        country: row.get(offset + 3)?,
        region: row.get(offset + 4)?,
        city: row.get(offset + 5)?,
        coordinates: Coordinates::from_pair(latitude, longitude),
    })
}

#[cfg(test)]
impl TopologyDb {
    pub fn router_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM routers", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn path_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM paths", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

//! Node store using SQLite
//!
//! One row per node identifier ever observed, upserted on every
//! observation.

use dhtscope_core::{unix_now, NodeObservation, NodeRecord};
use rusqlite::{params, Connection, Result, Row};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Largest page size accepted by [`NodeStore::paginated_list`]
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Window used for the "active" count of [`NodeStore::aggregate_stats`]
const ACTIVE_WINDOW_SECS: u64 = 3_600;

const NODE_COLUMNS: &str = "node_id, ip, port, city, country, region, latitude, longitude, \
                            times_seen, first_seen, last_seen";

/// Durable store of observed nodes
pub struct NodeStore {
    conn: Mutex<Connection>,
}

/// One page of nodes
#[derive(Debug, Clone, Serialize)]
pub struct NodePage {
    pub nodes: Vec<NodeRecord>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub pages: u64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

/// Historical statistics over every stored node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    pub total_historical: u64,
    pub active_last_hour: u64,
    pub avg_times_seen: u64,
    pub max_times_seen: u64,
    #[serde(rename = "countryDistribution")]
    pub country_distribution: Vec<CountryCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryCount {
    pub country: String,
    pub count: u64,
}

impl NodeStore {
    /// Open or create the node database
    pub fn open(path: &std::path::Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Create tables if they don't exist
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dht_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL UNIQUE,
                ip TEXT NOT NULL,
                port INTEGER NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                times_seen INTEGER NOT NULL DEFAULT 1,
                city TEXT,
                country TEXT,
                region TEXT,
                latitude REAL,
                longitude REAL
            );

            CREATE INDEX IF NOT EXISTS idx_last_seen ON dht_nodes(last_seen);
            CREATE INDEX IF NOT EXISTS idx_country ON dht_nodes(country);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a node, or bump the existing row
    ///
    /// New rows start at `times_seen = 1` with the observation's
    /// geolocation. Existing rows get `times_seen + 1`, a fresh `last_seen`
    /// and the new address if it changed; geolocation is left alone.
    pub fn upsert(&self, observation: &NodeObservation) -> Result<()> {
        let conn = self.conn();
        upsert_with(&conn, observation, unix_now())
    }

    /// [`upsert`](Self::upsert) with an explicit observation time
    ///
    /// `last_seen` never moves backwards, so an older observation that
    /// lands late only bumps the counter.
    pub fn upsert_at(&self, observation: &NodeObservation, now: u64) -> Result<()> {
        upsert_with(&self.conn(), observation, now)
    }

    /// Upsert an observation, logging and dropping it on failure
    pub fn record(&self, observation: &NodeObservation) -> bool {
        match self.upsert(observation) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to store node {}: {}", observation.contact.id, e);
                false
            }
        }
    }

    /// Fetch a single node by its hex identifier
    pub fn get(&self, node_id: &str) -> Result<Option<NodeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dht_nodes WHERE node_id = ?",
            NODE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![node_id], row_to_record)?;
        let record = rows.next().transpose()?;
        Ok(record)
    }

    /// Number of stored nodes
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM dht_nodes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Nodes ordered by most recent sighting
    ///
    /// `page` floors to 1 and `limit` clamps into [1, 1000].
    pub fn paginated_list(&self, page: i64, limit: i64) -> Result<NodePage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = (page - 1).saturating_mul(limit);

        let conn = self.conn();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM dht_nodes", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dht_nodes ORDER BY last_seen DESC, id DESC LIMIT ? OFFSET ?",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map(params![limit, offset], row_to_record)?
            .collect::<Result<Vec<_>>>()?;

        let has_more = offset.saturating_add(nodes.len() as i64) < total;
        let total = total as u64;
        let limit = limit as u64;

        Ok(NodePage {
            nodes,
            pagination: Pagination {
                total,
                page: page as u64,
                limit,
                pages: total.div_ceil(limit),
                has_more,
            },
        })
    }

    /// Nodes seen most often
    pub fn top_nodes(&self, limit: u32) -> Result<Vec<NodeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dht_nodes ORDER BY times_seen DESC, last_seen DESC LIMIT ?",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map(params![limit], row_to_record)?
            .collect::<Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Statistics over every stored node
    pub fn aggregate_stats(&self) -> Result<AggregateStats> {
        self.aggregate_stats_at(unix_now())
    }

    /// [`aggregate_stats`](Self::aggregate_stats) relative to `now`
    pub fn aggregate_stats_at(&self, now: u64) -> Result<AggregateStats> {
        let conn = self.conn();
        let active_since = now.saturating_sub(ACTIVE_WINDOW_SECS) as i64;

        let (total, active, avg, max) = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COUNT(CASE WHEN last_seen >= ?1 THEN 1 END),
                AVG(times_seen),
                MAX(times_seen)
            FROM dht_nodes
            "#,
            params![active_since],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT country, COUNT(*) AS count
            FROM dht_nodes
            WHERE country IS NOT NULL
            GROUP BY country
            ORDER BY count DESC, country ASC
            "#,
        )?;
        let country_distribution = stmt
            .query_map([], |row| {
                Ok(CountryCount {
                    country: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(AggregateStats {
            total_historical: total as u64,
            active_last_hour: active as u64,
            avg_times_seen: avg.unwrap_or(0.0).round() as u64,
            max_times_seen: max.unwrap_or(0) as u64,
            country_distribution,
        })
    }
}

fn upsert_with(conn: &Connection, observation: &NodeObservation, now: u64) -> Result<()> {
    let contact = &observation.contact;
    let geo = observation.geo.clone().unwrap_or_default();

    conn.execute(
        r#"
        INSERT INTO dht_nodes
        (node_id, ip, port, first_seen, last_seen, times_seen,
         city, country, region, latitude, longitude)
        VALUES (?1, ?2, ?3, ?4, ?4, 1, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(node_id) DO UPDATE SET
            last_seen = MAX(last_seen, excluded.last_seen),
            times_seen = times_seen + 1,
            ip = CASE WHEN ip != excluded.ip THEN excluded.ip ELSE ip END,
            port = CASE WHEN port != excluded.port THEN excluded.port ELSE port END
        "#,
        params![
            contact.id.to_hex(),
            contact.ip().to_string(),
            contact.port() as i64,
            now as i64,
            geo.city,
            geo.country,
            geo.region,
            geo.latitude,
            geo.longitude,
        ],
    )?;

    Ok(())
}

fn row_to_record(row: &Row<'_>) -> Result<NodeRecord> {
    Ok(NodeRecord {
        node_id: row.get(0)?,
        ip: row.get(1)?,
        port: row.get::<_, i64>(2)? as u16,
        city: row.get(3)?,
        country: row.get(4)?,
        region: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        times_seen: row.get::<_, i64>(8)? as u64,
        first_seen: row.get::<_, i64>(9)? as u64,
        last_seen: row.get::<_, i64>(10)? as u64,
    })
}

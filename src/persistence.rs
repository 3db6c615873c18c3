//! # Trip Store
//!
//! SQLite-backed storage for trip records and everything ingested into
//! them. The natural keys from the dedup rules live here as unique
//! indexes, so the final uniqueness guarantee is the store's, not the
//! application's: inserts report `Created` or `Duplicate` and the
//! pipeline turns `Duplicate` into a warning.
//!
//! NULL handling matters for the waypoint key: SQLite treats NULLs in a
//! unique index as distinct, but two waypoints that both lack a timestamp
//! must still collide, so the index is built over `COALESCE(time, '')`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use log::info;
use rusqlite::{Connection, Row, params};

use crate::error::{Result, is_constraint_violation};
use crate::grid::{Grid, MapSheet};
use crate::types::{
    InsertOutcome, PointFields, PointOfInterest, Route, RoutePoint, Track, TrackPoint,
    TrackSegment, TripDraft, TripKind, TripRecord, TripType, Waypoint,
};

/// Durable storage with unique-constraint and transactional semantics.
pub struct TripStore {
    conn: Connection,
}

impl TripStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!("trip store opened at {path}");
        Ok(Self { conn })
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Trip and template records
            CREATE TABLE IF NOT EXISTS trips (
                identifier TEXT PRIMARY KEY,
                record_class TEXT NOT NULL DEFAULT 'template',
                trip_type TEXT NOT NULL DEFAULT 'tramping',
                name TEXT,
                owner TEXT,
                description TEXT,
                region TEXT,
                start_date_planned TEXT,
                end_date_planned TEXT,
                start_date_actual TEXT,
                end_date_actual TEXT,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            -- Templates a trip was cloned from
            CREATE TABLE IF NOT EXISTS trip_templates (
                trip_id TEXT NOT NULL REFERENCES trips(identifier) ON DELETE CASCADE,
                template_id TEXT NOT NULL REFERENCES trips(identifier) ON DELETE CASCADE,
                PRIMARY KEY (trip_id, template_id)
            );

            -- Incoming points, one trip each
            CREATE TABLE IF NOT EXISTS waypoints (
                id INTEGER PRIMARY KEY,
                trip_id TEXT NOT NULL REFERENCES trips(identifier) ON DELETE CASCADE,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                ele REAL,
                time TEXT,
                magvar TEXT,
                geoidheight TEXT,
                name TEXT,
                comment TEXT,
                description TEXT,
                source TEXT,
                link1_href TEXT, link1_text TEXT, link1_type TEXT,
                link2_href TEXT, link2_text TEXT, link2_type TEXT,
                symbol TEXT,
                fix TEXT,
                sat TEXT,
                hdop TEXT, vdop TEXT, pdop TEXT,
                age_of_dgps_data TEXT,
                dgps_id TEXT,
                provenance TEXT NOT NULL,
                status TEXT,
                owner TEXT,
                group_name TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_waypoints_natural
                ON waypoints(trip_id, COALESCE(time, ''), lat, lon);

            -- Incoming line features, one trip each;
            -- (name, number) unique store-wide, matching the legacy scope
            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY,
                trip_id TEXT NOT NULL REFERENCES trips(identifier) ON DELETE CASCADE,
                name TEXT,
                number TEXT,
                comment TEXT,
                description TEXT,
                source TEXT,
                link1_href TEXT, link1_text TEXT, link1_type TEXT,
                link2_href TEXT, link2_text TEXT, link2_type TEXT,
                owner TEXT,
                group_name TEXT,
                acquired TEXT,
                provenance TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tracks_natural
                ON tracks(COALESCE(name, ''), COALESCE(number, ''));

            CREATE TABLE IF NOT EXISTS track_segments (
                id INTEGER PRIMARY KEY,
                track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL,
                UNIQUE (track_id, ordinal)
            );

            CREATE TABLE IF NOT EXISTS track_points (
                id INTEGER PRIMARY KEY,
                segment_id INTEGER NOT NULL REFERENCES track_segments(id) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                ele REAL,
                time TEXT,
                magvar TEXT,
                geoidheight TEXT,
                name TEXT,
                comment TEXT,
                description TEXT,
                source TEXT,
                link1_href TEXT, link1_text TEXT, link1_type TEXT,
                link2_href TEXT, link2_text TEXT, link2_type TEXT,
                symbol TEXT,
                fix TEXT,
                sat TEXT,
                hdop TEXT, vdop TEXT, pdop TEXT,
                age_of_dgps_data TEXT,
                dgps_id TEXT,
                course TEXT,
                speed TEXT,
                provenance TEXT NOT NULL,
                UNIQUE (segment_id, ordinal)
            );

            -- Outgoing line features, shareable; name unique store-wide
            CREATE TABLE IF NOT EXISTS routes (
                id INTEGER PRIMARY KEY,
                name TEXT,
                number TEXT,
                comment TEXT,
                description TEXT,
                source TEXT,
                link1_href TEXT, link1_text TEXT, link1_type TEXT,
                link2_href TEXT, link2_text TEXT, link2_type TEXT,
                owner TEXT,
                group_name TEXT,
                provenance TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_routes_natural
                ON routes(COALESCE(name, ''));

            CREATE TABLE IF NOT EXISTS route_points (
                id INTEGER PRIMARY KEY,
                route_id INTEGER NOT NULL REFERENCES routes(id) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                ele REAL,
                time TEXT,
                magvar TEXT,
                geoidheight TEXT,
                name TEXT,
                comment TEXT,
                description TEXT,
                source TEXT,
                link1_href TEXT, link1_text TEXT, link1_type TEXT,
                link2_href TEXT, link2_text TEXT, link2_type TEXT,
                symbol TEXT,
                fix TEXT,
                sat TEXT,
                hdop TEXT, vdop TEXT, pdop TEXT,
                age_of_dgps_data TEXT,
                dgps_id TEXT,
                provenance TEXT NOT NULL,
                UNIQUE (route_id, ordinal)
            );

            CREATE TABLE IF NOT EXISTS trip_routes (
                trip_id TEXT NOT NULL REFERENCES trips(identifier) ON DELETE CASCADE,
                route_id INTEGER NOT NULL REFERENCES routes(id) ON DELETE CASCADE,
                PRIMARY KEY (trip_id, route_id)
            );

            -- Outgoing points, shareable, no ordering
            CREATE TABLE IF NOT EXISTS points_of_interest (
                id INTEGER PRIMARY KEY,
                name TEXT,
                symbol TEXT,
                number TEXT,
                description TEXT,
                source TEXT,
                url TEXT,
                urlname TEXT,
                lat REAL NOT NULL,
                lon REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trip_pois (
                trip_id TEXT NOT NULL REFERENCES trips(identifier) ON DELETE CASCADE,
                poi_id INTEGER NOT NULL REFERENCES points_of_interest(id) ON DELETE CASCADE,
                PRIMARY KEY (trip_id, poi_id)
            );

            -- Static sheet grids, seeded once from survey data.
            -- Geometry is NZTM (EPSG:2193); exterior ring stored as JSON.
            CREATE TABLE IF NOT EXISTS map_sheets (
                grid TEXT NOT NULL CHECK (grid IN ('topo250', 'topo50')),
                identifier TEXT NOT NULL,
                sheet_name TEXT,
                nzms_xmin REAL NOT NULL,
                nzms_xmax REAL NOT NULL,
                nzms_ymin REAL NOT NULL,
                nzms_ymax REAL NOT NULL,
                exterior_json TEXT NOT NULL,
                PRIMARY KEY (grid, identifier)
            );

            CREATE INDEX IF NOT EXISTS idx_waypoints_trip ON waypoints(trip_id);
            CREATE INDEX IF NOT EXISTS idx_tracks_trip ON tracks(trip_id);
            CREATE INDEX IF NOT EXISTS idx_track_segments_track ON track_segments(track_id);
            CREATE INDEX IF NOT EXISTS idx_track_points_segment ON track_points(segment_id);
            CREATE INDEX IF NOT EXISTS idx_route_points_route ON route_points(route_id);
            "#,
        )?;
        Ok(())
    }

    fn insert_outcome(&self, result: rusqlite::Result<usize>) -> Result<InsertOutcome> {
        match result {
            Ok(_) => Ok(InsertOutcome::Created(self.conn.last_insert_rowid())),
            Err(e) if is_constraint_violation(&e) => Ok(InsertOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Trip Records
    // ========================================================================

    /// Create a trip or template. The identifier is a random 128-bit
    /// value assigned here, once, and never mutated afterwards.
    pub fn create_trip(&self, draft: &TripDraft) -> Result<TripRecord> {
        let record = TripRecord {
            identifier: uuid::Uuid::new_v4().to_string(),
            kind: draft.kind.unwrap_or(TripKind::Template),
            trip_type: draft.trip_type.unwrap_or(TripType::Tramping),
            name: draft.name.clone(),
            owner: draft.owner.clone(),
            description: draft.description.clone(),
            region: draft.region.clone(),
            start_date_planned: draft.start_date_planned,
            end_date_planned: draft.end_date_planned,
            start_date_actual: draft.start_date_actual,
            end_date_actual: draft.end_date_actual,
        };
        self.conn.execute(
            "INSERT INTO trips (identifier, record_class, trip_type, name, owner,
                                description, region, start_date_planned, end_date_planned,
                                start_date_actual, end_date_actual)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.identifier,
                record.kind.as_str(),
                record.trip_type.as_str(),
                record.name,
                record.owner,
                record.description,
                record.region,
                date_to_text(record.start_date_planned),
                date_to_text(record.end_date_planned),
                date_to_text(record.start_date_actual),
                date_to_text(record.end_date_actual),
            ],
        )?;
        info!(
            "created {} {} ({})",
            record.kind.as_str(),
            record.short_id(),
            record.name.as_deref().unwrap_or("unnamed")
        );
        Ok(record)
    }

    /// Fetch a trip by its full identifier.
    pub fn trip(&self, identifier: &str) -> Result<Option<TripRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT identifier, record_class, trip_type, name, owner, description, region,
                    start_date_planned, end_date_planned, start_date_actual, end_date_actual
             FROM trips WHERE identifier = ?1",
        )?;
        let mut rows = stmt.query_map(params![identifier], trip_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Find trips whose identifier contains the given fragment, for
    /// truncated-identifier display lookups.
    pub fn trips_matching(&self, fragment: &str) -> Result<Vec<TripRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT identifier, record_class, trip_type, name, owner, description, region,
                    start_date_planned, end_date_planned, start_date_actual, end_date_actual
             FROM trips WHERE identifier LIKE '%' || ?1 || '%' ORDER BY identifier",
        )?;
        let rows = stmt.query_map(params![fragment], trip_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Record that a trip was cloned from a template.
    pub fn link_template(&self, trip_id: &str, template_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO trip_templates (trip_id, template_id) VALUES (?1, ?2)",
            params![trip_id, template_id],
        )?;
        Ok(())
    }

    /// Identifiers of the templates a trip was cloned from.
    pub fn templates_for_trip(&self, trip_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT template_id FROM trip_templates WHERE trip_id = ?1 ORDER BY template_id",
        )?;
        let rows = stmt.query_map(params![trip_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ========================================================================
    // Waypoints
    // ========================================================================

    /// Insert a waypoint; the natural key (trip, time, lat, lon) is
    /// enforced by the store. `wpt.id` is ignored.
    pub fn insert_waypoint(&self, wpt: &Waypoint) -> Result<InsertOutcome> {
        let f = &wpt.fields;
        let result = self.conn.execute(
            "INSERT INTO waypoints (
                trip_id, lat, lon, ele, time, magvar, geoidheight, name, comment,
                description, source, link1_href, link1_text, link1_type,
                link2_href, link2_text, link2_type, symbol, fix, sat,
                hdop, vdop, pdop, age_of_dgps_data, dgps_id, provenance,
                status, owner, group_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                     ?27, ?28, ?29)",
            params![
                wpt.trip_id,
                f.lat,
                f.lon,
                f.ele,
                time_to_text(f.time),
                f.magvar,
                f.geoidheight,
                f.name,
                f.comment,
                f.description,
                f.source,
                f.link1_href,
                f.link1_text,
                f.link1_type,
                f.link2_href,
                f.link2_text,
                f.link2_type,
                f.symbol,
                f.fix,
                f.sat,
                f.hdop,
                f.vdop,
                f.pdop,
                f.age_of_dgps_data,
                f.dgps_id,
                f.provenance,
                wpt.status,
                wpt.owner,
                wpt.group_name,
            ],
        );
        self.insert_outcome(result)
    }

    /// Update the free-text status of a stored waypoint.
    pub fn set_waypoint_status(&self, waypoint_id: i64, status: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE waypoints SET status = ?2 WHERE id = ?1",
            params![waypoint_id, status],
        )?;
        Ok(())
    }

    pub fn waypoints_for_trip(&self, trip_id: &str) -> Result<Vec<Waypoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, trip_id, lat, lon, ele, time, magvar, geoidheight, name, comment,
                    description, source, link1_href, link1_text, link1_type,
                    link2_href, link2_text, link2_type, symbol, fix, sat,
                    hdop, vdop, pdop, age_of_dgps_data, dgps_id, provenance,
                    status, owner, group_name
             FROM waypoints WHERE trip_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![trip_id], |row| {
            Ok(Waypoint {
                id: row.get(0)?,
                trip_id: row.get(1)?,
                fields: point_fields_from_row(row, 2, false)?,
                status: row.get(27)?,
                owner: row.get(28)?,
                group_name: row.get(29)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// Insert a track; the natural key (name, number) is store-wide.
    /// `track.id` is ignored.
    pub fn insert_track(&self, track: &Track) -> Result<InsertOutcome> {
        let result = self.conn.execute(
            "INSERT INTO tracks (
                trip_id, name, number, comment, description, source,
                link1_href, link1_text, link1_type, link2_href, link2_text, link2_type,
                owner, group_name, acquired, provenance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                track.trip_id,
                track.name,
                track.number,
                track.comment,
                track.description,
                track.source,
                track.link1_href,
                track.link1_text,
                track.link1_type,
                track.link2_href,
                track.link2_text,
                track.link2_type,
                track.owner,
                track.group_name,
                time_to_text(track.acquired),
                track.provenance,
            ],
        );
        self.insert_outcome(result)
    }

    /// Create a segment under a track with its zero-based ordinal.
    pub fn insert_segment(&self, track_id: i64, ordinal: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO track_segments (track_id, ordinal) VALUES (?1, ?2)",
            params![track_id, ordinal],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Bulk-insert points under a segment, one transaction for the lot.
    pub fn insert_track_points(
        &self,
        segment_id: i64,
        points: &[(i64, PointFields)],
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO track_points (
                    segment_id, ordinal, lat, lon, ele, time, magvar, geoidheight,
                    name, comment, description, source,
                    link1_href, link1_text, link1_type, link2_href, link2_text, link2_type,
                    symbol, fix, sat, hdop, vdop, pdop, age_of_dgps_data, dgps_id,
                    course, speed, provenance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                         ?27, ?28, ?29)",
            )?;
            for (ordinal, f) in points {
                stmt.execute(params![
                    segment_id,
                    ordinal,
                    f.lat,
                    f.lon,
                    f.ele,
                    time_to_text(f.time),
                    f.magvar,
                    f.geoidheight,
                    f.name,
                    f.comment,
                    f.description,
                    f.source,
                    f.link1_href,
                    f.link1_text,
                    f.link1_type,
                    f.link2_href,
                    f.link2_text,
                    f.link2_type,
                    f.symbol,
                    f.fix,
                    f.sat,
                    f.hdop,
                    f.vdop,
                    f.pdop,
                    f.age_of_dgps_data,
                    f.dgps_id,
                    f.course,
                    f.speed,
                    f.provenance,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn tracks_for_trip(&self, trip_id: &str) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, trip_id, name, number, comment, description, source,
                    link1_href, link1_text, link1_type, link2_href, link2_text, link2_type,
                    owner, group_name, acquired, provenance
             FROM tracks WHERE trip_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![trip_id], |row| {
            Ok(Track {
                id: row.get(0)?,
                trip_id: row.get(1)?,
                name: row.get(2)?,
                number: row.get(3)?,
                comment: row.get(4)?,
                description: row.get(5)?,
                source: row.get(6)?,
                link1_href: row.get(7)?,
                link1_text: row.get(8)?,
                link1_type: row.get(9)?,
                link2_href: row.get(10)?,
                link2_text: row.get(11)?,
                link2_type: row.get(12)?,
                owner: row.get(13)?,
                group_name: row.get(14)?,
                acquired: text_to_time(row.get(15)?),
                provenance: row.get(16)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn segments_for_track(&self, track_id: i64) -> Result<Vec<TrackSegment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, track_id, ordinal FROM track_segments
             WHERE track_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(params![track_id], |row| {
            Ok(TrackSegment {
                id: row.get(0)?,
                track_id: row.get(1)?,
                ordinal: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn points_for_segment(&self, segment_id: i64) -> Result<Vec<TrackPoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, segment_id, ordinal, lat, lon, ele, time, magvar, geoidheight,
                    name, comment, description, source,
                    link1_href, link1_text, link1_type, link2_href, link2_text, link2_type,
                    symbol, fix, sat, hdop, vdop, pdop, age_of_dgps_data, dgps_id,
                    course, speed, provenance
             FROM track_points WHERE segment_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(params![segment_id], |row| {
            Ok(TrackPoint {
                id: row.get(0)?,
                segment_id: row.get(1)?,
                ordinal: row.get(2)?,
                fields: point_fields_from_row(row, 3, true)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Number of segments in a track.
    pub fn track_segment_count(&self, track_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM track_segments WHERE track_id = ?1",
            params![track_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of points in a track across all segments.
    pub fn track_point_count(&self, track_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM track_points p
             JOIN track_segments s ON p.segment_id = s.id
             WHERE s.track_id = ?1",
            params![track_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// Insert a route; `name` is unique store-wide. `route.id` is ignored.
    pub fn insert_route(&self, route: &Route) -> Result<InsertOutcome> {
        let result = self.conn.execute(
            "INSERT INTO routes (
                name, number, comment, description, source,
                link1_href, link1_text, link1_type, link2_href, link2_text, link2_type,
                owner, group_name, provenance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                route.name,
                route.number,
                route.comment,
                route.description,
                route.source,
                route.link1_href,
                route.link1_text,
                route.link1_type,
                route.link2_href,
                route.link2_text,
                route.link2_type,
                route.owner,
                route.group_name,
                route.provenance,
            ],
        );
        self.insert_outcome(result)
    }

    /// Associate a route with a trip (many-to-many).
    pub fn link_trip_route(&self, trip_id: &str, route_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO trip_routes (trip_id, route_id) VALUES (?1, ?2)",
            params![trip_id, route_id],
        )?;
        Ok(())
    }

    /// Bulk-insert points under a route, one transaction for the lot.
    pub fn insert_route_points(&self, route_id: i64, points: &[(i64, PointFields)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO route_points (
                    route_id, ordinal, lat, lon, ele, time, magvar, geoidheight,
                    name, comment, description, source,
                    link1_href, link1_text, link1_type, link2_href, link2_text, link2_type,
                    symbol, fix, sat, hdop, vdop, pdop, age_of_dgps_data, dgps_id, provenance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
            )?;
            for (ordinal, f) in points {
                stmt.execute(params![
                    route_id,
                    ordinal,
                    f.lat,
                    f.lon,
                    f.ele,
                    time_to_text(f.time),
                    f.magvar,
                    f.geoidheight,
                    f.name,
                    f.comment,
                    f.description,
                    f.source,
                    f.link1_href,
                    f.link1_text,
                    f.link1_type,
                    f.link2_href,
                    f.link2_text,
                    f.link2_type,
                    f.symbol,
                    f.fix,
                    f.sat,
                    f.hdop,
                    f.vdop,
                    f.pdop,
                    f.age_of_dgps_data,
                    f.dgps_id,
                    f.provenance,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn routes_for_trip(&self, trip_id: &str) -> Result<Vec<Route>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.name, r.number, r.comment, r.description, r.source,
                    r.link1_href, r.link1_text, r.link1_type,
                    r.link2_href, r.link2_text, r.link2_type,
                    r.owner, r.group_name, r.provenance
             FROM routes r
             JOIN trip_routes tr ON tr.route_id = r.id
             WHERE tr.trip_id = ?1 ORDER BY r.id",
        )?;
        let rows = stmt.query_map(params![trip_id], |row| {
            Ok(Route {
                id: row.get(0)?,
                name: row.get(1)?,
                number: row.get(2)?,
                comment: row.get(3)?,
                description: row.get(4)?,
                source: row.get(5)?,
                link1_href: row.get(6)?,
                link1_text: row.get(7)?,
                link1_type: row.get(8)?,
                link2_href: row.get(9)?,
                link2_text: row.get(10)?,
                link2_type: row.get(11)?,
                owner: row.get(12)?,
                group_name: row.get(13)?,
                provenance: row.get(14)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn points_for_route(&self, route_id: i64) -> Result<Vec<RoutePoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, route_id, ordinal, lat, lon, ele, time, magvar, geoidheight,
                    name, comment, description, source,
                    link1_href, link1_text, link1_type, link2_href, link2_text, link2_type,
                    symbol, fix, sat, hdop, vdop, pdop, age_of_dgps_data, dgps_id, provenance
             FROM route_points WHERE route_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(params![route_id], |row| {
            Ok(RoutePoint {
                id: row.get(0)?,
                route_id: row.get(1)?,
                ordinal: row.get(2)?,
                fields: point_fields_from_row(row, 3, false)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ========================================================================
    // Points of Interest
    // ========================================================================

    /// Create a point of interest. `poi.id` is ignored. POIs come from
    /// direct user entry, not from the ingestion pipeline.
    pub fn add_poi(&self, poi: &PointOfInterest) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO points_of_interest
                (name, symbol, number, description, source, url, urlname, lat, lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                poi.name,
                poi.symbol,
                poi.number,
                poi.description,
                poi.source,
                poi.url,
                poi.urlname,
                poi.lat,
                poi.lon,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn link_trip_poi(&self, trip_id: &str, poi_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO trip_pois (trip_id, poi_id) VALUES (?1, ?2)",
            params![trip_id, poi_id],
        )?;
        Ok(())
    }

    pub fn pois_for_trip(&self, trip_id: &str) -> Result<Vec<PointOfInterest>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.symbol, p.number, p.description, p.source,
                    p.url, p.urlname, p.lat, p.lon
             FROM points_of_interest p
             JOIN trip_pois tp ON tp.poi_id = p.id
             WHERE tp.trip_id = ?1 ORDER BY p.id",
        )?;
        let rows = stmt.query_map(params![trip_id], |row| {
            Ok(PointOfInterest {
                id: row.get(0)?,
                name: row.get(1)?,
                symbol: row.get(2)?,
                number: row.get(3)?,
                description: row.get(4)?,
                source: row.get(5)?,
                url: row.get(6)?,
                urlname: row.get(7)?,
                lat: row.get(8)?,
                lon: row.get(9)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ========================================================================
    // Cross-entity Reads
    // ========================================================================

    /// Every WGS84 position owned by a trip: waypoints, track points,
    /// route points and POIs. Used by the sheet-coverage aggregate.
    pub fn trip_positions(&self, trip_id: &str) -> Result<Vec<(f64, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT lat, lon FROM waypoints WHERE trip_id = ?1
             UNION ALL
             SELECT p.lat, p.lon FROM track_points p
                 JOIN track_segments s ON p.segment_id = s.id
                 JOIN tracks t ON s.track_id = t.id
                 WHERE t.trip_id = ?1
             UNION ALL
             SELECT p.lat, p.lon FROM route_points p
                 JOIN trip_routes tr ON p.route_id = tr.route_id
                 WHERE tr.trip_id = ?1
             UNION ALL
             SELECT p.lat, p.lon FROM points_of_interest p
                 JOIN trip_pois tp ON p.id = tp.poi_id
                 WHERE tp.trip_id = ?1",
        )?;
        let rows = stmt.query_map(params![trip_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ========================================================================
    // Map Sheets (static reference data)
    // ========================================================================

    /// Seed sheet grid reference data. Safe to call again with the same
    /// data; rows are replaced by (grid, identifier).
    pub fn seed_sheets(&self, sheets: &[MapSheet]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO map_sheets
                    (grid, identifier, sheet_name,
                     nzms_xmin, nzms_xmax, nzms_ymin, nzms_ymax, exterior_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for sheet in sheets {
                stmt.execute(params![
                    sheet.grid.as_str(),
                    sheet.identifier,
                    sheet.sheet_name,
                    sheet.xmin,
                    sheet.xmax,
                    sheet.ymin,
                    sheet.ymax,
                    serde_json::to_string(&sheet.exterior)?,
                ])?;
            }
        }
        tx.commit()?;
        info!("seeded {} map sheets", sheets.len());
        Ok(())
    }

    /// Load all sheets of one grid.
    pub fn sheets(&self, grid: Grid) -> Result<Vec<MapSheet>> {
        let mut stmt = self.conn.prepare(
            "SELECT identifier, sheet_name, nzms_xmin, nzms_xmax, nzms_ymin, nzms_ymax,
                    exterior_json
             FROM map_sheets WHERE grid = ?1 ORDER BY identifier",
        )?;
        let rows = stmt.query_map(params![grid.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut sheets = Vec::new();
        for row in rows {
            let (identifier, sheet_name, xmin, xmax, ymin, ymax, exterior_json) = row?;
            sheets.push(MapSheet {
                grid,
                identifier,
                sheet_name,
                xmin,
                xmax,
                ymin,
                ymax,
                exterior: serde_json::from_str(&exterior_json)?,
            });
        }
        Ok(sheets)
    }
}

// ============================================================================
// Row / Text Conversions
// ============================================================================

fn trip_from_row(row: &Row<'_>) -> rusqlite::Result<TripRecord> {
    let kind_text: String = row.get(1)?;
    let type_text: String = row.get(2)?;
    Ok(TripRecord {
        identifier: row.get(0)?,
        kind: TripKind::parse(&kind_text).unwrap_or(TripKind::Template),
        trip_type: TripType::parse(&type_text).unwrap_or(TripType::Tramping),
        name: row.get(3)?,
        owner: row.get(4)?,
        description: row.get(5)?,
        region: row.get(6)?,
        start_date_planned: text_to_date(row.get(7)?),
        end_date_planned: text_to_date(row.get(8)?),
        start_date_actual: text_to_date(row.get(9)?),
        end_date_actual: text_to_date(row.get(10)?),
    })
}

/// Read the shared point-attribute columns starting at `base`. Track
/// points carry two extra motion columns before provenance.
fn point_fields_from_row(
    row: &Row<'_>,
    base: usize,
    with_motion: bool,
) -> rusqlite::Result<PointFields> {
    let mut fields = PointFields {
        lat: row.get(base)?,
        lon: row.get(base + 1)?,
        ele: row.get(base + 2)?,
        time: text_to_time(row.get(base + 3)?),
        magvar: row.get(base + 4)?,
        geoidheight: row.get(base + 5)?,
        name: row.get(base + 6)?,
        comment: row.get(base + 7)?,
        description: row.get(base + 8)?,
        source: row.get(base + 9)?,
        link1_href: row.get(base + 10)?,
        link1_text: row.get(base + 11)?,
        link1_type: row.get(base + 12)?,
        link2_href: row.get(base + 13)?,
        link2_text: row.get(base + 14)?,
        link2_type: row.get(base + 15)?,
        symbol: row.get(base + 16)?,
        fix: row.get(base + 17)?,
        sat: row.get(base + 18)?,
        hdop: row.get(base + 19)?,
        vdop: row.get(base + 20)?,
        pdop: row.get(base + 21)?,
        age_of_dgps_data: row.get(base + 22)?,
        dgps_id: row.get(base + 23)?,
        course: None,
        speed: None,
        provenance: String::new(),
    };
    if with_motion {
        fields.course = row.get(base + 24)?;
        fields.speed = row.get(base + 25)?;
        fields.provenance = row.get(base + 26)?;
    } else {
        fields.provenance = row.get(base + 24)?;
    }
    Ok(fields)
}

/// Canonical UTC RFC 3339 with second precision, so that re-ingesting the
/// same file reproduces byte-identical natural-key text.
pub(crate) fn time_to_text(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn text_to_time(text: Option<String>) -> Option<DateTime<Utc>> {
    text.and_then(|t| {
        DateTime::parse_from_rfc3339(&t)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn date_to_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn text_to_date(text: Option<String>) -> Option<NaiveDate> {
    text.and_then(|t| NaiveDate::parse_from_str(&t, "%Y-%m-%d").ok())
}

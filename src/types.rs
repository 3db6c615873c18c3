//! Domain entity types.
//!
//! These are data containers shared by the persistence layer and the
//! ingestion pipeline. Field sets mirror the stored schema one to one so
//! that the GPX-to-column mapping stays explicit and exhaustive.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::gpx::GpxPoint;

// ============================================================================
// Trip Records
// ============================================================================

/// Whether a record is a reusable plan or a dated excursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripKind {
    Template,
    Trip,
}

impl TripKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripKind::Template => "template",
            TripKind::Trip => "trip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "template" => Some(TripKind::Template),
            "trip" => Some(TripKind::Trip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripType {
    Air,
    Boat,
    Cycle,
    Road,
    Tramping,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::Air => "air",
            TripType::Boat => "boat",
            TripType::Cycle => "cycle",
            TripType::Road => "road",
            TripType::Tramping => "tramping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "air" => Some(TripType::Air),
            "boat" => Some(TripType::Boat),
            "cycle" => Some(TripType::Cycle),
            "road" => Some(TripType::Road),
            "tramping" => Some(TripType::Tramping),
            _ => None,
        }
    }
}

/// A trip or template record. The identifier is a random 128-bit value
/// assigned once at creation and never changed; displays truncate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripRecord {
    pub identifier: String,
    pub kind: TripKind,
    pub trip_type: TripType,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub description: Option<String>,
    pub region: Option<String>,
    pub start_date_planned: Option<NaiveDate>,
    pub end_date_planned: Option<NaiveDate>,
    pub start_date_actual: Option<NaiveDate>,
    pub end_date_actual: Option<NaiveDate>,
}

impl TripRecord {
    /// Truncated identifier for display.
    pub fn short_id(&self) -> &str {
        &self.identifier[..self.identifier.len().min(8)]
    }

    /// Length of the trip in days, inclusive of both ends. Planned dates
    /// win over actual when both ranges are present.
    pub fn days_length(&self) -> Option<i64> {
        let (start, end) = match (self.start_date_planned, self.end_date_planned) {
            (Some(s), Some(e)) => (s, e),
            _ => (self.start_date_actual?, self.end_date_actual?),
        };
        Some((end - start).num_days() + 1)
    }
}

/// Fields supplied when creating a trip or template.
#[derive(Debug, Clone, Default)]
pub struct TripDraft {
    pub kind: Option<TripKind>,
    pub trip_type: Option<TripType>,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub description: Option<String>,
    pub region: Option<String>,
    pub start_date_planned: Option<NaiveDate>,
    pub end_date_planned: Option<NaiveDate>,
    pub start_date_actual: Option<NaiveDate>,
    pub end_date_actual: Option<NaiveDate>,
}

// ============================================================================
// Point Fields
// ============================================================================

/// The full per-point column set, mapped explicitly from a parsed GPX
/// point. Every destination column appears here by name; an attribute
/// that stops being copied shows up as a removed field, not a silent
/// runtime drop.
#[derive(Debug, Clone, Default)]
pub struct PointFields {
    pub lat: f64,
    pub lon: f64,
    pub ele: Option<f64>,
    pub time: Option<DateTime<Utc>>,
    pub magvar: Option<String>,
    pub geoidheight: Option<String>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link1_href: Option<String>,
    pub link1_text: Option<String>,
    pub link1_type: Option<String>,
    pub link2_href: Option<String>,
    pub link2_text: Option<String>,
    pub link2_type: Option<String>,
    pub symbol: Option<String>,
    pub fix: Option<String>,
    pub sat: Option<String>,
    pub hdop: Option<String>,
    pub vdop: Option<String>,
    pub pdop: Option<String>,
    pub age_of_dgps_data: Option<String>,
    pub dgps_id: Option<String>,
    /// Track points only.
    pub course: Option<String>,
    /// Track points only.
    pub speed: Option<String>,
    /// Source filename, path component stripped.
    pub provenance: String,
}

impl PointFields {
    /// Exhaustive field mapping from the document model. `time` is passed
    /// in already parsed because a malformed timestamp is tolerated (the
    /// pipeline stores null and warns).
    pub fn from_gpx(p: &GpxPoint, time: Option<DateTime<Utc>>, provenance: &str) -> Self {
        Self {
            lat: p.lat,
            lon: p.lon,
            ele: p.ele,
            time,
            magvar: p.magvar.clone(),
            geoidheight: p.geoidheight.clone(),
            name: p.name.clone(),
            comment: p.comment.clone(),
            description: p.description.clone(),
            source: p.source.clone(),
            link1_href: p.link.as_ref().map(|l| l.href.clone()),
            link1_text: p.link.as_ref().and_then(|l| l.text.clone()),
            link1_type: p.link.as_ref().and_then(|l| l.link_type.clone()),
            link2_href: p.link2.as_ref().map(|l| l.href.clone()),
            link2_text: p.link2.as_ref().and_then(|l| l.text.clone()),
            link2_type: p.link2.as_ref().and_then(|l| l.link_type.clone()),
            symbol: p.symbol.clone(),
            fix: p.fix.clone(),
            sat: p.sat.clone(),
            hdop: p.hdop.clone(),
            vdop: p.vdop.clone(),
            pdop: p.pdop.clone(),
            age_of_dgps_data: p.age_of_dgps_data.clone(),
            dgps_id: p.dgps_id.clone(),
            course: p.course.clone(),
            speed: p.speed.clone(),
            provenance: provenance.to_string(),
        }
    }
}

// ============================================================================
// Incoming Entities (created by ingestion)
// ============================================================================

/// An incoming point owned by exactly one trip.
/// Natural key: (trip, time, lat, lon).
#[derive(Debug, Clone)]
pub struct Waypoint {
    pub id: i64,
    pub trip_id: String,
    pub fields: PointFields,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub group_name: Option<String>,
}

/// An incoming line feature owned by exactly one trip.
/// Natural key: (name, number), store-wide.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: i64,
    pub trip_id: String,
    pub name: Option<String>,
    pub number: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link1_href: Option<String>,
    pub link1_text: Option<String>,
    pub link1_type: Option<String>,
    pub link2_href: Option<String>,
    pub link2_text: Option<String>,
    pub link2_type: Option<String>,
    pub owner: Option<String>,
    pub group_name: Option<String>,
    pub acquired: Option<DateTime<Utc>>,
    pub provenance: String,
}

/// A contiguous run of track points; ordinal is zero-based within the track.
#[derive(Debug, Clone)]
pub struct TrackSegment {
    pub id: i64,
    pub track_id: i64,
    pub ordinal: i64,
}

/// A recorded point; ordinal is zero-based within its segment.
#[derive(Debug, Clone)]
pub struct TrackPoint {
    pub id: i64,
    pub segment_id: i64,
    pub ordinal: i64,
    pub fields: PointFields,
}

// ============================================================================
// Outgoing Entities (shareable across trips)
// ============================================================================

/// An outgoing line feature, many-to-many with trips and templates.
/// Natural key: name, store-wide.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: i64,
    pub name: Option<String>,
    pub number: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link1_href: Option<String>,
    pub link1_text: Option<String>,
    pub link1_type: Option<String>,
    pub link2_href: Option<String>,
    pub link2_text: Option<String>,
    pub link2_type: Option<String>,
    pub owner: Option<String>,
    pub group_name: Option<String>,
    pub provenance: String,
}

/// A planned point; ordinal is zero-based within its route.
#[derive(Debug, Clone)]
pub struct RoutePoint {
    pub id: i64,
    pub route_id: i64,
    pub ordinal: i64,
    pub fields: PointFields,
}

/// An outgoing point intended for upload to a device, many-to-many with
/// trips and templates, no ordering semantics.
#[derive(Debug, Clone)]
pub struct PointOfInterest {
    pub id: i64,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub number: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub urlname: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

// ============================================================================
// Store Outcomes
// ============================================================================

/// Result of an insert against a natural-key unique index. Uniqueness is
/// enforced by the store; a lost race and a straightforward duplicate are
/// indistinguishable and both land on `Duplicate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row created; carries the new rowid.
    Created(i64),
    /// An equivalent record already exists.
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpx::GpxLink;

    #[test]
    fn test_trip_enums_round_trip() {
        for t in [
            TripType::Air,
            TripType::Boat,
            TripType::Cycle,
            TripType::Road,
            TripType::Tramping,
        ] {
            assert_eq!(TripType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TripKind::parse("trip"), Some(TripKind::Trip));
        assert_eq!(TripKind::parse("weekend"), None);
    }

    #[test]
    fn test_days_length_prefers_planned() {
        let mut trip = TripRecord {
            identifier: "0".repeat(32),
            kind: TripKind::Trip,
            trip_type: TripType::Tramping,
            name: None,
            owner: None,
            description: None,
            region: None,
            start_date_planned: NaiveDate::from_ymd_opt(2020, 4, 10),
            end_date_planned: NaiveDate::from_ymd_opt(2020, 4, 13),
            start_date_actual: NaiveDate::from_ymd_opt(2020, 4, 10),
            end_date_actual: NaiveDate::from_ymd_opt(2020, 4, 11),
        };
        assert_eq!(trip.days_length(), Some(4));
        trip.start_date_planned = None;
        assert_eq!(trip.days_length(), Some(2));
        trip.start_date_actual = None;
        assert_eq!(trip.days_length(), None);
    }

    #[test]
    fn test_point_fields_mapping_is_exhaustive() {
        let mut p = GpxPoint::new(-41.3, 174.8);
        p.ele = Some(120.0);
        p.name = Some("spur".into());
        p.fix = Some("2d".into());
        p.link = Some(GpxLink {
            href: "https://example.nz".into(),
            text: Some("notes".into()),
            link_type: None,
        });
        p.speed = Some("0.8".into());

        let fields = PointFields::from_gpx(&p, None, "walk.gpx");
        assert_eq!(fields.lat, -41.3);
        assert_eq!(fields.ele, Some(120.0));
        assert_eq!(fields.name.as_deref(), Some("spur"));
        assert_eq!(fields.fix.as_deref(), Some("2d"));
        assert_eq!(fields.link1_href.as_deref(), Some("https://example.nz"));
        assert_eq!(fields.link1_text.as_deref(), Some("notes"));
        assert_eq!(fields.speed.as_deref(), Some("0.8"));
        assert_eq!(fields.provenance, "walk.gpx");
        assert!(fields.time.is_none());
    }
}

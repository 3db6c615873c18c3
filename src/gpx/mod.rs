//! In-memory model of a parsed GPX file.
//!
//! The model is a plain tree: routes and waypoints at the top level,
//! tracks owning segments owning points. Every point carries the fixed
//! optional-field schema of GPX 1.0/1.1; `course` and `speed` only ever
//! appear on track points but live on the shared struct so the field
//! mapping into the store stays exhaustive in one place.
//!
//! Parsing is pure: it produces no side effects and touches no store.

mod parser;

use std::path::Path;

use serde::Serialize;

use crate::error::Result;

/// A `<link>` element: href attribute plus optional text and type children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpxLink {
    pub href: String,
    pub text: Option<String>,
    pub link_type: Option<String>,
}

/// A single GPX point (`<wpt>`, `<rtept>` or `<trkpt>`).
///
/// `time` is kept as the raw element text; the ingestion pipeline parses
/// it so that a malformed timestamp degrades to a warning instead of
/// failing the whole file.
#[derive(Debug, Clone, Default)]
pub struct GpxPoint {
    pub lat: f64,
    pub lon: f64,
    pub ele: Option<f64>,
    pub time: Option<String>,
    pub magvar: Option<String>,
    pub geoidheight: Option<String>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link: Option<GpxLink>,
    pub link2: Option<GpxLink>,
    pub symbol: Option<String>,
    pub point_type: Option<String>,
    pub fix: Option<String>,
    pub sat: Option<String>,
    pub hdop: Option<String>,
    pub vdop: Option<String>,
    pub pdop: Option<String>,
    pub age_of_dgps_data: Option<String>,
    pub dgps_id: Option<String>,
    /// GPX 1.0 only.
    pub course: Option<String>,
    /// GPX 1.0 only.
    pub speed: Option<String>,
}

impl GpxPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            ..Default::default()
        }
    }

    /// Whether lat/lon fall inside WGS84 range. Out-of-range points are
    /// skipped per point at ingestion, not rejected at parse time.
    pub fn in_range(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A `<rte>` element with its ordered points.
#[derive(Debug, Clone, Default)]
pub struct GpxRoute {
    pub name: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link: Option<GpxLink>,
    pub number: Option<String>,
    pub route_type: Option<String>,
    pub points: Vec<GpxPoint>,
}

/// A `<trkseg>` element.
#[derive(Debug, Clone, Default)]
pub struct GpxSegment {
    pub points: Vec<GpxPoint>,
}

/// A `<trk>` element with its ordered segments.
#[derive(Debug, Clone, Default)]
pub struct GpxTrack {
    pub name: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link: Option<GpxLink>,
    pub number: Option<String>,
    pub track_type: Option<String>,
    pub segments: Vec<GpxSegment>,
}

impl GpxTrack {
    pub fn point_count(&self) -> usize {
        self.segments.iter().map(|s| s.points.len()).sum()
    }
}

/// A parsed GPX document in document order.
#[derive(Debug, Clone, Default)]
pub struct GpxDocument {
    /// Source filename with any path component stripped; recorded as
    /// provenance on every entity created from this document.
    pub source_name: String,
    pub routes: Vec<GpxRoute>,
    pub tracks: Vec<GpxTrack>,
    pub waypoints: Vec<GpxPoint>,
}

impl GpxDocument {
    /// Parse a GPX byte stream.
    ///
    /// Fails with `MalformedDocument` on the first structural violation
    /// (broken XML, unterminated element, missing or non-numeric lat/lon)
    /// and with `DocumentTooLarge` when the byte or point guard trips.
    pub fn parse(bytes: &[u8], source_name: &str) -> Result<Self> {
        let stripped = Path::new(source_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_name.to_string());
        parser::parse_document(bytes, stripped)
    }

    /// Total number of points across waypoints, routes and tracks.
    pub fn point_count(&self) -> usize {
        self.waypoints.len()
            + self.routes.iter().map(|r| r.points.len()).sum::<usize>()
            + self.tracks.iter().map(|t| t.point_count()).sum::<usize>()
    }

    /// Analysis view: counts and short per-item summaries for preview
    /// display, produced without touching the store.
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            file_name: self.source_name.clone(),
            routes: self
                .routes
                .iter()
                .map(|r| FeatureSummary {
                    name: r.name.clone(),
                    point_count: r.points.len(),
                    start: r.points.first().map(|p| (p.lat, p.lon)),
                })
                .collect(),
            tracks: self
                .tracks
                .iter()
                .map(|t| FeatureSummary {
                    name: t.name.clone(),
                    point_count: t.point_count(),
                    start: t
                        .segments
                        .first()
                        .and_then(|s| s.points.first())
                        .map(|p| (p.lat, p.lon)),
                })
                .collect(),
            waypoints: self
                .waypoints
                .iter()
                .map(|p| PointSummary {
                    name: p.name.clone(),
                    lat: p.lat,
                    lon: p.lon,
                })
                .collect(),
        }
    }
}

/// Preview summary of a GPX file (the analysis view).
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub file_name: String,
    pub routes: Vec<FeatureSummary>,
    pub tracks: Vec<FeatureSummary>,
    pub waypoints: Vec<PointSummary>,
}

impl FileSummary {
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn waypoint_count(&self) -> usize {
        self.waypoints.len()
    }
}

/// One route or track in the preview summary.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureSummary {
    pub name: Option<String>,
    pub point_count: usize,
    /// First point of the feature, if any.
    pub start: Option<(f64, f64)>,
}

/// One waypoint in the preview summary.
#[derive(Debug, Clone, Serialize)]
pub struct PointSummary {
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

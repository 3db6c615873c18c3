//! # Map Grid Index
//!
//! Resolves NZTM (EPSG:2193) positions to NZ topographic map sheets, one
//! index per grid series (Topo250 and Topo50). Lookup runs in two stages:
//! an R-tree over sheet bounding boxes narrows the candidates, then exact
//! polygon containment decides. Containment is boundary-inclusive, so a
//! position exactly on a shared sheet edge matches both sheets; the lowest
//! identifier wins to keep the answer deterministic.
//!
//! A position outside all sheets is a `None` answer, never an error:
//! trips legitimately leave mapped coverage (offshore legs, Australia).
//!
//! Reprojection from WGS84 is not done here. Callers supply a
//! [`Projection`] and the index only ever sees NZTM coordinates.

use std::collections::BTreeSet;

use geo::{Intersects, LineString, Point, Polygon};
use log::debug;
use rstar::{AABB, RTree, RTreeObject};

use crate::error::Result;
use crate::persistence::TripStore;

/// The two published topographic grid series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grid {
    /// 1:250,000 series.
    Topo250,
    /// 1:50,000 series.
    Topo50,
}

impl Grid {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grid::Topo250 => "topo250",
            Grid::Topo50 => "topo50",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topo250" => Some(Grid::Topo250),
            "topo50" => Some(Grid::Topo50),
            _ => None,
        }
    }
}

/// One published map sheet: identifier (e.g. "BP33"), optional name, NZTM
/// bounding box and exterior polygon ring. Static reference data, seeded
/// once into the store and loaded here at index build.
#[derive(Debug, Clone)]
pub struct MapSheet {
    pub grid: Grid,
    pub identifier: String,
    pub sheet_name: Option<String>,
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    /// Exterior ring in NZTM, closed or open; no holes.
    pub exterior: Vec<(f64, f64)>,
}

/// R-tree entry: the sheet's bbox as envelope, its polygon for the exact
/// stage.
struct SheetEntry {
    identifier: String,
    bbox: AABB<[f64; 2]>,
    polygon: Polygon<f64>,
}

impl SheetEntry {
    fn new(sheet: &MapSheet) -> Self {
        let ring: LineString<f64> = sheet
            .exterior
            .iter()
            .map(|&(x, y)| (x, y))
            .collect::<Vec<_>>()
            .into();
        Self {
            identifier: sheet.identifier.clone(),
            bbox: AABB::from_corners([sheet.xmin, sheet.ymin], [sheet.xmax, sheet.ymax]),
            polygon: Polygon::new(ring, vec![]),
        }
    }
}

impl RTreeObject for SheetEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bbox
    }
}

/// Supplies the WGS84 → NZTM reprojection for coverage queries.
pub trait Projection {
    /// Project a WGS84 position to NZTM easting/northing in metres.
    fn to_nztm(&self, lat: f64, lon: f64) -> (f64, f64);
}

/// Sheet identifiers a trip touches, deduplicated per grid. `BTreeSet`
/// keeps the report ordering stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetCoverage {
    pub topo250: BTreeSet<String>,
    pub topo50: BTreeSet<String>,
}

/// In-memory two-stage lookup over both grid series.
pub struct MapGridIndex {
    topo250: RTree<SheetEntry>,
    topo50: RTree<SheetEntry>,
}

impl MapGridIndex {
    /// Build the index from sheet reference data.
    pub fn new(sheets: &[MapSheet]) -> Self {
        let mut topo250 = Vec::new();
        let mut topo50 = Vec::new();
        for sheet in sheets {
            let entry = SheetEntry::new(sheet);
            match sheet.grid {
                Grid::Topo250 => topo250.push(entry),
                Grid::Topo50 => topo50.push(entry),
            }
        }
        debug!(
            "grid index built: {} topo250 sheets, {} topo50 sheets",
            topo250.len(),
            topo50.len()
        );
        Self {
            topo250: RTree::bulk_load(topo250),
            topo50: RTree::bulk_load(topo50),
        }
    }

    /// Build the index from the sheets seeded into a store.
    pub fn from_store(store: &TripStore) -> Result<Self> {
        let mut sheets = store.sheets(Grid::Topo250)?;
        sheets.extend(store.sheets(Grid::Topo50)?);
        Ok(Self::new(&sheets))
    }

    /// Resolve an NZTM position to a sheet identifier on one grid.
    ///
    /// Boundary-inclusive; ties broken by lowest identifier; `None` when
    /// the position is outside every sheet.
    pub fn locate(&self, x: f64, y: f64, grid: Grid) -> Option<&str> {
        let tree = match grid {
            Grid::Topo250 => &self.topo250,
            Grid::Topo50 => &self.topo50,
        };
        let point = Point::new(x, y);
        tree.locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .filter(|entry| entry.polygon.intersects(&point))
            .map(|entry| entry.identifier.as_str())
            .min()
    }

    /// Resolve every position a trip owns (waypoints, track points, route
    /// points, POIs) against both grids and return the deduplicated sheet
    /// sets.
    pub fn trip_coverage(
        &self,
        store: &TripStore,
        trip_id: &str,
        projection: &impl Projection,
    ) -> Result<SheetCoverage> {
        let mut coverage = SheetCoverage::default();
        for (lat, lon) in store.trip_positions(trip_id)? {
            let (x, y) = projection.to_nztm(lat, lon);
            if let Some(id) = self.locate(x, y, Grid::Topo250) {
                coverage.topo250.insert(id.to_string());
            }
            if let Some(id) = self.locate(x, y, Grid::Topo50) {
                coverage.topo50.insert(id.to_string());
            }
        }
        Ok(coverage)
    }
}

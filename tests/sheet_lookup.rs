//! Sheet lookup integration tests.
//!
//! Seeds a small Topo250/Topo50 grid into a store, ingests a document and
//! checks the position -> sheet resolution end to end.
//!
//! Run with: `cargo test --test sheet_lookup`

use topotrip::{
    GpxDocument, Grid, IngestMetadata, MapGridIndex, MapSheet, Projection, TripDraft,
    TripStore, ingest,
};

/// Affine stand-in for the real EPSG:2193 transform, accurate enough for
/// the lower North Island fixtures used here: one degree of longitude is
/// ~84 km, one degree of latitude ~111 km at these latitudes.
struct FlatNztm;

impl Projection for FlatNztm {
    fn to_nztm(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = 1_735_000.0 + (lon - 175.1) * 84_000.0;
        let y = 5_430_000.0 + (lat + 41.3) * 111_000.0;
        (x, y)
    }
}

fn sheet(grid: Grid, identifier: &str, name: &str, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> MapSheet {
    MapSheet {
        grid,
        identifier: identifier.into(),
        sheet_name: Some(name.into()),
        xmin,
        xmax,
        ymin,
        ymax,
        exterior: vec![
            (xmin, ymin),
            (xmax, ymin),
            (xmax, ymax),
            (xmin, ymax),
            (xmin, ymin),
        ],
    }
}

fn seeded_store() -> TripStore {
    let store = TripStore::in_memory().expect("in-memory store");
    store
        .seed_sheets(&[
            sheet(
                Grid::Topo50,
                "BP33",
                "Featherston",
                1_720_000.0,
                5_420_000.0,
                1_744_000.0,
                5_456_000.0,
            ),
            sheet(
                Grid::Topo50,
                "BP34",
                "Masterton",
                1_744_000.0,
                5_420_000.0,
                1_768_000.0,
                5_456_000.0,
            ),
            // A Topo250 sheet deliberately not covering the fixture point.
            sheet(
                Grid::Topo250,
                "S28",
                "Somewhere Else",
                1_900_000.0,
                5_600_000.0,
                2_000_000.0,
                5_700_000.0,
            ),
        ])
        .expect("seed sheets");
    store
}

#[test]
fn test_point_resolves_on_one_grid_only() {
    let store = seeded_store();
    let index = MapGridIndex::from_store(&store).unwrap();

    // Inside BP33 on Topo50; no Topo250 sheet covers it.
    assert_eq!(index.locate(1_735_000.0, 5_430_000.0, Grid::Topo50), Some("BP33"));
    assert_eq!(index.locate(1_735_000.0, 5_430_000.0, Grid::Topo250), None);
}

#[test]
fn test_bbox_candidate_must_pass_polygon_stage() {
    // A sheet whose polygon is the lower-right triangle of its bbox.
    let mut tri = sheet(Grid::Topo50, "TRI1", "Triangle", 0.0, 0.0, 1000.0, 1000.0);
    tri.exterior = vec![(0.0, 0.0), (1000.0, 0.0), (1000.0, 1000.0), (0.0, 0.0)];
    let index = MapGridIndex::new(&[tri]);

    // Both positions pass the bbox stage; only one is in the polygon.
    assert_eq!(index.locate(900.0, 100.0, Grid::Topo50), Some("TRI1"));
    assert_eq!(index.locate(100.0, 900.0, Grid::Topo50), None);
}

#[test]
fn test_shared_edge_resolves_to_lowest_identifier() {
    let store = seeded_store();
    let index = MapGridIndex::from_store(&store).unwrap();

    // Exactly on the BP33/BP34 boundary.
    assert_eq!(index.locate(1_744_000.0, 5_430_000.0, Grid::Topo50), Some("BP33"));
}

#[test]
fn test_located_point_lies_within_sheet_bbox() {
    let store = seeded_store();
    let index = MapGridIndex::from_store(&store).unwrap();

    // Every resolved position must fall inside the stored bbox of the
    // sheet it resolved to.
    let positions = [
        (1_735_000.0, 5_430_000.0),
        (1_750_000.0, 5_440_000.0),
        (1_744_000.0, 5_430_000.0), // shared edge
    ];
    let sheets = store.sheets(Grid::Topo50).unwrap();
    for (x, y) in positions {
        let id = index.locate(x, y, Grid::Topo50).expect("inside coverage");
        let sheet = sheets
            .iter()
            .find(|s| s.identifier == id)
            .expect("resolved sheet is seeded");
        assert!(
            sheet.xmin <= x && x <= sheet.xmax && sheet.ymin <= y && y <= sheet.ymax,
            "({x}, {y}) resolved to {id} but lies outside its bbox"
        );
    }
}

#[test]
fn test_locate_is_deterministic() {
    let store = seeded_store();
    let index = MapGridIndex::from_store(&store).unwrap();

    let first = index.locate(1_744_000.0, 5_430_000.0, Grid::Topo50);
    for _ in 0..10 {
        assert_eq!(index.locate(1_744_000.0, 5_430_000.0, Grid::Topo50), first);
    }
    // A rebuilt index gives the same answer.
    let rebuilt = MapGridIndex::from_store(&store).unwrap();
    assert_eq!(rebuilt.locate(1_744_000.0, 5_430_000.0, Grid::Topo50), first);
}

#[test]
fn test_trip_coverage_from_ingested_document() {
    let store = seeded_store();
    let trip = store.create_trip(&TripDraft::default()).unwrap();

    // Track crossing from BP33 into BP34, waypoint inside BP33.
    let xml = r#"<?xml version="1.0"?>
<gpx version="1.1">
  <wpt lat="-41.3" lon="175.1"/>
  <trk>
    <name>crossing east</name>
    <trkseg>
      <trkpt lat="-41.3" lon="175.1"/>
      <trkpt lat="-41.3" lon="175.3"/>
    </trkseg>
  </trk>
</gpx>"#;
    let doc = GpxDocument::parse(xml.as_bytes(), "crossing.gpx").unwrap();
    ingest(&store, &doc, &trip.identifier, &IngestMetadata::default()).unwrap();

    let index = MapGridIndex::from_store(&store).unwrap();
    let coverage = index
        .trip_coverage(&store, &trip.identifier, &FlatNztm)
        .unwrap();

    assert_eq!(
        coverage.topo50.iter().collect::<Vec<_>>(),
        vec!["BP33", "BP34"]
    );
    assert!(coverage.topo250.is_empty());
}

#[test]
fn test_offshore_trip_has_empty_coverage() {
    let store = seeded_store();
    let trip = store.create_trip(&TripDraft::default()).unwrap();

    let xml = r#"<?xml version="1.0"?>
<gpx version="1.1">
  <wpt lat="-45.0" lon="160.0"/>
</gpx>"#;
    let doc = GpxDocument::parse(xml.as_bytes(), "offshore.gpx").unwrap();
    ingest(&store, &doc, &trip.identifier, &IngestMetadata::default()).unwrap();

    let index = MapGridIndex::from_store(&store).unwrap();
    let coverage = index
        .trip_coverage(&store, &trip.identifier, &FlatNztm)
        .unwrap();
    assert!(coverage.topo50.is_empty());
    assert!(coverage.topo250.is_empty());
}

//! Ingestion integration tests.
//!
//! Tests the full pipeline against a file-backed store: parse -> ingest ->
//! query, including re-ingestion idempotence and the malformed-document
//! abort guarantee.
//!
//! Run with: `cargo test --test ingestion_flow`

use tempfile::TempDir;
use topotrip::{
    GpxDocument, IngestMetadata, TripDraft, TripError, TripKind, TripStore, ingest,
};

/// Helper: create a file-backed store with one trip, return store + id + dir.
fn setup_store() -> (TripStore, String, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp_dir.path().join("trips.db");
    let store = TripStore::open(db_path.to_str().expect("utf-8 path"))
        .expect("failed to open store");
    let trip = store
        .create_trip(&TripDraft {
            kind: Some(TripKind::Trip),
            name: Some("Easter trip".into()),
            ..Default::default()
        })
        .expect("failed to create trip");
    (store, trip.identifier, tmp_dir)
}

const MIXED_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="unit">
  <wpt lat="-41.3" lon="174.8">
    <ele>120.5</ele>
    <time>2020-01-01T00:00:00Z</time>
    <name>Roadend</name>
  </wpt>
  <rte>
    <name>Approach</name>
    <rtept lat="-41.00" lon="175.00"/>
    <rtept lat="-41.05" lon="175.05"/>
  </rte>
  <trk>
    <name>Day 1</name>
    <number>1</number>
    <trkseg>
      <trkpt lat="-41.10" lon="175.10"><ele>300</ele></trkpt>
      <trkpt lat="-41.11" lon="175.11"><ele>320</ele></trkpt>
      <trkpt lat="-41.12" lon="175.12"><ele>340</ele></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="-41.20" lon="175.20"/>
      <trkpt lat="-41.21" lon="175.21"/>
    </trkseg>
  </trk>
</gpx>"#;

#[test]
fn test_full_document_lands_in_store() {
    let (store, trip_id, _tmp) = setup_store();
    let doc = GpxDocument::parse(MIXED_DOC.as_bytes(), "/uploads/easter.gpx")
        .expect("parse failed");
    let warnings = ingest(&store, &doc, &trip_id, &IngestMetadata::default())
        .expect("ingest failed");
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");

    let waypoints = store.waypoints_for_trip(&trip_id).unwrap();
    assert_eq!(waypoints.len(), 1);
    assert_eq!(waypoints[0].fields.name.as_deref(), Some("Roadend"));
    assert_eq!(waypoints[0].fields.ele, Some(120.5));
    // Provenance is the filename only, path stripped.
    assert_eq!(waypoints[0].fields.provenance, "easter.gpx");

    let routes = store.routes_for_trip(&trip_id).unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(store.points_for_route(routes[0].id).unwrap().len(), 2);

    let tracks = store.tracks_for_trip(&trip_id).unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].number.as_deref(), Some("1"));
    assert_eq!(store.track_segment_count(tracks[0].id).unwrap(), 2);
    assert_eq!(store.track_point_count(tracks[0].id).unwrap(), 5);

    let segments = store.segments_for_track(tracks[0].id).unwrap();
    let ordinals = |i: usize| -> Vec<i64> {
        store
            .points_for_segment(segments[i].id)
            .unwrap()
            .iter()
            .map(|p| p.ordinal)
            .collect()
    };
    assert_eq!(ordinals(0), vec![0, 1, 2]);
    assert_eq!(ordinals(1), vec![0, 1]);
}

#[test]
fn test_reingest_warns_and_changes_nothing() {
    let (store, trip_id, _tmp) = setup_store();
    let doc = GpxDocument::parse(MIXED_DOC.as_bytes(), "easter.gpx").unwrap();

    ingest(&store, &doc, &trip_id, &IngestMetadata::default()).unwrap();
    let warnings = ingest(&store, &doc, &trip_id, &IngestMetadata::default()).unwrap();

    // One warning per duplicate top-level entity, entity order preserved.
    assert_eq!(warnings.len(), 3);
    assert!(warnings[0].contains("route 'Approach' already recorded"));
    assert!(warnings[1].contains("track 'Day 1' already recorded"));
    assert!(warnings[2].contains("already recorded"));

    assert_eq!(store.waypoints_for_trip(&trip_id).unwrap().len(), 1);
    assert_eq!(store.routes_for_trip(&trip_id).unwrap().len(), 1);
    let tracks = store.tracks_for_trip(&trip_id).unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(store.track_point_count(tracks[0].id).unwrap(), 5);
}

#[test]
fn test_malformed_document_writes_nothing() {
    let (store, trip_id, _tmp) = setup_store();

    // Unterminated <trk>: parsing fails before ingestion can start.
    let broken = r#"<?xml version="1.0"?>
<gpx version="1.1">
  <wpt lat="-41.3" lon="174.8"/>
  <trk><trkseg><trkpt lat="-41.0" lon="175.0"/></trkseg>
</gpx>"#;
    let err = GpxDocument::parse(broken.as_bytes(), "broken.gpx");
    assert!(matches!(err, Err(TripError::MalformedDocument { .. })));

    assert!(store.waypoints_for_trip(&trip_id).unwrap().is_empty());
    assert!(store.tracks_for_trip(&trip_id).unwrap().is_empty());
    assert!(store.routes_for_trip(&trip_id).unwrap().is_empty());
}

#[test]
fn test_analysis_view_before_commit() {
    // Preview a file without a store anywhere in sight.
    let doc = GpxDocument::parse(MIXED_DOC.as_bytes(), "easter.gpx").unwrap();
    let summary = doc.summary();
    assert_eq!(summary.file_name, "easter.gpx");
    assert_eq!(summary.route_count(), 1);
    assert_eq!(summary.track_count(), 1);
    assert_eq!(summary.waypoint_count(), 1);
    assert_eq!(summary.tracks[0].point_count, 5);
    assert_eq!(summary.tracks[0].start, Some((-41.10, 175.10)));
}

#[test]
fn test_store_survives_reopen() {
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp_dir.path().join("trips.db");
    let path = db_path.to_str().expect("utf-8 path");

    let trip_id = {
        let store = TripStore::open(path).unwrap();
        let trip = store.create_trip(&TripDraft::default()).unwrap();
        let doc = GpxDocument::parse(MIXED_DOC.as_bytes(), "easter.gpx").unwrap();
        ingest(&store, &doc, &trip.identifier, &IngestMetadata::default()).unwrap();
        trip.identifier
    };

    let store = TripStore::open(path).unwrap();
    assert!(store.trip(&trip_id).unwrap().is_some());
    assert_eq!(store.waypoints_for_trip(&trip_id).unwrap().len(), 1);
    let tracks = store.tracks_for_trip(&trip_id).unwrap();
    assert_eq!(store.track_point_count(tracks[0].id).unwrap(), 5);
}

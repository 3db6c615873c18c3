//! # Ingestion Pipeline
//!
//! Turns a parsed [`GpxDocument`](crate::gpx::GpxDocument) into stored
//! entities under one trip. Routes are processed first, then tracks, then
//! waypoints, so warnings come out in a deterministic order for identical
//! input.
//!
//! Per-entity problems (duplicate natural key, out-of-range coordinate,
//! unreadable timestamp) degrade to warning strings in the return value;
//! the only hard failures are an unknown trip and store errors.
//!
//! Concurrent ingestion into the same trip is serialized by an exclusive
//! in-process lease keyed by trip identifier. Different trips proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::info;
use once_cell::sync::Lazy;

use crate::error::{Result, TripError};
use crate::gpx::{GpxDocument, GpxPoint, GpxRoute, GpxTrack};
use crate::persistence::TripStore;
use crate::types::{InsertOutcome, PointFields, Route, Track, Waypoint};

/// Caller-supplied overrides applied to every entity created from one
/// document. A present override wins over the corresponding GPX field.
#[derive(Debug, Clone, Default)]
pub struct IngestMetadata {
    pub comment: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

// One lease per trip identifier. Leases are never removed; the registry
// grows with the number of distinct trips ingested into, which is small.
static TRIP_LEASES: Lazy<Mutex<HashMap<String, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn trip_lease(trip_id: &str) -> Arc<Mutex<()>> {
    let mut leases = TRIP_LEASES.lock().unwrap_or_else(|e| e.into_inner());
    leases.entry(trip_id.to_string()).or_default().clone()
}

/// Ingest a parsed document into a trip.
///
/// Returns the warnings accumulated while processing, in document order
/// within each phase (routes, then tracks, then waypoints). An empty
/// vector means every entity in the document was stored.
pub fn ingest(
    store: &TripStore,
    doc: &GpxDocument,
    trip_id: &str,
    meta: &IngestMetadata,
) -> Result<Vec<String>> {
    let lease = trip_lease(trip_id);
    let _held = lease.lock().unwrap_or_else(|e| e.into_inner());

    if store.trip(trip_id)?.is_none() {
        return Err(TripError::UnknownTrip {
            identifier: trip_id.to_string(),
        });
    }

    let mut warnings = Vec::new();

    for route in &doc.routes {
        ingest_route(store, route, trip_id, meta, &doc.source_name, &mut warnings)?;
    }
    for track in &doc.tracks {
        ingest_track(store, track, trip_id, meta, &doc.source_name, &mut warnings)?;
    }
    for wpt in &doc.waypoints {
        ingest_waypoint(store, wpt, trip_id, meta, &doc.source_name, &mut warnings)?;
    }

    info!(
        "ingested {} into trip {}: {} routes, {} tracks, {} waypoints, {} warnings",
        doc.source_name,
        &trip_id[..trip_id.len().min(8)],
        doc.routes.len(),
        doc.tracks.len(),
        doc.waypoints.len(),
        warnings.len()
    );
    Ok(warnings)
}

fn ingest_route(
    store: &TripStore,
    route: &GpxRoute,
    trip_id: &str,
    meta: &IngestMetadata,
    provenance: &str,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let record = Route {
        id: 0,
        name: route.name.clone(),
        number: route.number.clone(),
        comment: meta.comment.clone().or_else(|| route.comment.clone()),
        description: meta
            .description
            .clone()
            .or_else(|| route.description.clone()),
        source: route.source.clone(),
        link1_href: route.link.as_ref().map(|l| l.href.clone()),
        link1_text: route.link.as_ref().and_then(|l| l.text.clone()),
        link1_type: route.link.as_ref().and_then(|l| l.link_type.clone()),
        link2_href: None,
        link2_text: None,
        link2_type: None,
        owner: meta.owner.clone(),
        group_name: meta.group.clone(),
        provenance: provenance.to_string(),
    };

    let route_id = match store.insert_route(&record)? {
        InsertOutcome::Created(id) => id,
        InsertOutcome::Duplicate => {
            warnings.push(format!(
                "route '{}' already recorded; skipped",
                display_name(&route.name)
            ));
            return Ok(());
        }
    };
    store.link_trip_route(trip_id, route_id)?;

    let context = format!("route '{}'", display_name(&route.name));
    let points = collect_points(&route.points, meta, provenance, &context, warnings);
    store.insert_route_points(route_id, &points)?;
    Ok(())
}

fn ingest_track(
    store: &TripStore,
    track: &GpxTrack,
    trip_id: &str,
    meta: &IngestMetadata,
    provenance: &str,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let record = Track {
        id: 0,
        trip_id: trip_id.to_string(),
        name: track.name.clone(),
        number: track.number.clone(),
        comment: meta.comment.clone().or_else(|| track.comment.clone()),
        description: meta
            .description
            .clone()
            .or_else(|| track.description.clone()),
        source: track.source.clone(),
        link1_href: track.link.as_ref().map(|l| l.href.clone()),
        link1_text: track.link.as_ref().and_then(|l| l.text.clone()),
        link1_type: track.link.as_ref().and_then(|l| l.link_type.clone()),
        link2_href: None,
        link2_text: None,
        link2_type: None,
        owner: meta.owner.clone(),
        group_name: meta.group.clone(),
        acquired: Some(Utc::now()),
        provenance: provenance.to_string(),
    };

    let track_id = match store.insert_track(&record)? {
        InsertOutcome::Created(id) => id,
        InsertOutcome::Duplicate => {
            warnings.push(format!(
                "track '{}' already recorded; skipped",
                display_name(&track.name)
            ));
            return Ok(());
        }
    };

    let context = format!("track '{}'", display_name(&track.name));
    for (ordinal, segment) in track.segments.iter().enumerate() {
        let segment_id = store.insert_segment(track_id, ordinal as i64)?;
        let points = collect_points(&segment.points, meta, provenance, &context, warnings);
        store.insert_track_points(segment_id, &points)?;
    }
    Ok(())
}

fn ingest_waypoint(
    store: &TripStore,
    point: &GpxPoint,
    trip_id: &str,
    meta: &IngestMetadata,
    provenance: &str,
    warnings: &mut Vec<String>,
) -> Result<()> {
    if !point.in_range() {
        warnings.push(format!(
            "skipped out-of-range waypoint ({}, {})",
            point.lat, point.lon
        ));
        return Ok(());
    }

    let context = format!("waypoint ({}, {})", point.lat, point.lon);
    let time = parse_time(point, &context, warnings);
    let mut fields = PointFields::from_gpx(point, time, provenance);
    fields.comment = meta.comment.clone().or(fields.comment);
    fields.description = meta.description.clone().or(fields.description);

    let wpt = Waypoint {
        id: 0,
        trip_id: trip_id.to_string(),
        fields,
        status: None,
        owner: meta.owner.clone(),
        group_name: meta.group.clone(),
    };
    if store.insert_waypoint(&wpt)? == InsertOutcome::Duplicate {
        warnings.push(format!("{context} already recorded; skipped"));
    }
    Ok(())
}

/// Range-check, timestamp-parse and ordinal-assign a point run. Skipped
/// points do not leave holes: ordinals stay compact and zero-based.
fn collect_points(
    points: &[GpxPoint],
    meta: &IngestMetadata,
    provenance: &str,
    context: &str,
    warnings: &mut Vec<String>,
) -> Vec<(i64, PointFields)> {
    let mut out = Vec::with_capacity(points.len());
    for point in points {
        if !point.in_range() {
            warnings.push(format!(
                "skipped out-of-range point ({}, {}) in {context}",
                point.lat, point.lon
            ));
            continue;
        }
        let time = parse_time(point, context, warnings);
        let mut fields = PointFields::from_gpx(point, time, provenance);
        fields.comment = meta.comment.clone().or(fields.comment);
        fields.description = meta.description.clone().or(fields.description);
        out.push((out.len() as i64, fields));
    }
    out
}

/// RFC 3339 timestamp parse, normalized to UTC. An unreadable value is
/// tolerated: the point is stored without a time and a warning is emitted.
fn parse_time(
    point: &GpxPoint,
    context: &str,
    warnings: &mut Vec<String>,
) -> Option<DateTime<Utc>> {
    let raw = point.time.as_deref()?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
            warnings.push(format!(
                "unreadable timestamp '{raw}' on point ({}, {}) in {context}; stored without time",
                point.lat, point.lon
            ));
            None
        }
    }
}

fn display_name(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("(unnamed)")
}

//! Topotrip - GPX ingestion and map-sheet resolution for trip records
//!
//! This crate provides:
//! - GPX 1.0/1.1 parsing into a plain document model
//! - SQLite persistence for trips, waypoints, tracks, routes and POIs
//! - A warning-collecting ingestion pipeline with natural-key dedup
//! - NZ Topo250/Topo50 sheet lookup over NZTM coordinates

pub mod error;
pub use error::{Result, TripError};

// Document model and parser
pub mod gpx;
pub use gpx::{
    FeatureSummary, FileSummary, GpxDocument, GpxLink, GpxPoint, GpxRoute, GpxSegment, GpxTrack,
    PointSummary,
};

// Domain entities shared by the store and the pipeline
pub mod types;
pub use types::{
    InsertOutcome, PointFields, PointOfInterest, Route, RoutePoint, Track, TrackPoint,
    TrackSegment, TripDraft, TripKind, TripRecord, TripType, Waypoint,
};

// SQLite persistence layer
pub mod persistence;
pub use persistence::TripStore;

// Ingestion pipeline
pub mod ingest;
pub use ingest::{IngestMetadata, ingest};

// Sheet grid lookup
pub mod grid;
pub use grid::{Grid, MapGridIndex, MapSheet, Projection, SheetCoverage};

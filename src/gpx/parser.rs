//! Event-driven GPX parser.
//!
//! Walks the XML once with quick-xml, building the document model in
//! document order. Structural violations abort with `MalformedDocument`
//! naming the first one encountered; a running point counter and an input
//! byte guard bound memory on pathological files.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Result, TripError};
use crate::gpx::{GpxDocument, GpxLink, GpxPoint, GpxRoute, GpxSegment, GpxTrack};

/// Input byte guard. Real device files top out in the low megabytes.
pub const MAX_DOCUMENT_BYTES: usize = 32 * 1024 * 1024;

/// Total point guard across waypoints, routes and track segments.
pub const MAX_DOCUMENT_POINTS: usize = 500_000;

pub(super) fn parse_document(bytes: &[u8], source_name: String) -> Result<GpxDocument> {
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(TripError::DocumentTooLarge {
            count: bytes.len(),
            limit: MAX_DOCUMENT_BYTES,
            unit: "bytes",
        });
    }

    let xml = std::str::from_utf8(bytes)
        .map_err(|e| TripError::malformed(format!("document is not valid UTF-8: {e}")))?;

    let mut parser = DocParser {
        reader: Reader::from_str(xml),
        points_seen: 0,
    };
    let mut doc = GpxDocument {
        source_name,
        ..Default::default()
    };

    loop {
        match parser.reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"wpt" => doc.waypoints.push(parser.parse_point(&e)?),
                b"rte" => doc.routes.push(parser.parse_route()?),
                b"trk" => doc.tracks.push(parser.parse_track()?),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"wpt" {
                    doc.waypoints.push(parser.parse_empty_point(&e)?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parser.xml_error(e)),
            _ => {}
        }
    }

    Ok(doc)
}

struct DocParser<'x> {
    reader: Reader<&'x [u8]>,
    points_seen: usize,
}

impl<'x> DocParser<'x> {
    fn xml_error(&self, err: quick_xml::Error) -> TripError {
        TripError::malformed(format!(
            "xml error at byte {}: {}",
            self.reader.buffer_position(),
            err
        ))
    }

    fn unterminated(&self, element: &str) -> TripError {
        TripError::malformed(format!("unterminated <{element}> element"))
    }

    fn count_point(&mut self) -> Result<()> {
        self.points_seen += 1;
        if self.points_seen > MAX_DOCUMENT_POINTS {
            return Err(TripError::DocumentTooLarge {
                count: self.points_seen,
                limit: MAX_DOCUMENT_POINTS,
                unit: "points",
            });
        }
        Ok(())
    }

    /// Parse the lat/lon attributes of a point element. Both are
    /// mandatory in the GPX schema; a missing or non-numeric value is a
    /// structural violation.
    fn parse_lat_lon(&mut self, start: &BytesStart<'_>) -> Result<(f64, f64)> {
        let element = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;

        for attr_result in start.attributes() {
            let attr = attr_result.map_err(|e| self.xml_error(e.into()))?;
            let key = attr.key.local_name();
            let val = String::from_utf8_lossy(&attr.value).into_owned();
            match key.as_ref() {
                b"lat" => {
                    lat = Some(val.parse::<f64>().map_err(|_| {
                        TripError::malformed(format!(
                            "invalid lat attribute '{val}' on <{element}>"
                        ))
                    })?);
                }
                b"lon" => {
                    lon = Some(val.parse::<f64>().map_err(|_| {
                        TripError::malformed(format!(
                            "invalid lon attribute '{val}' on <{element}>"
                        ))
                    })?);
                }
                _ => {}
            }
        }

        let lat = lat.ok_or_else(|| {
            TripError::malformed(format!("missing lat attribute on <{element}>"))
        })?;
        let lon = lon.ok_or_else(|| {
            TripError::malformed(format!("missing lon attribute on <{element}>"))
        })?;
        Ok((lat, lon))
    }

    /// A self-closing point element: lat/lon attributes only.
    fn parse_empty_point(&mut self, start: &BytesStart<'_>) -> Result<GpxPoint> {
        self.count_point()?;
        let (lat, lon) = self.parse_lat_lon(start)?;
        Ok(GpxPoint::new(lat, lon))
    }

    /// Parse a point element (`wpt`, `rtept`, `trkpt`) and its children.
    /// Called after receiving `Event::Start` for the point element.
    fn parse_point(&mut self, start: &BytesStart<'_>) -> Result<GpxPoint> {
        self.count_point()?;
        let (lat, lon) = self.parse_lat_lon(start)?;
        let mut point = GpxPoint::new(lat, lon);
        let element = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let end_name = start.name().0.to_vec();

        loop {
            match self.reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"ele" => point.ele = self.read_text(&e)?.parse::<f64>().ok(),
                    b"time" => point.time = Some(self.read_text(&e)?),
                    b"magvar" => point.magvar = Some(self.read_text(&e)?),
                    b"geoidheight" => point.geoidheight = Some(self.read_text(&e)?),
                    b"name" => point.name = Some(self.read_text(&e)?),
                    b"cmt" => point.comment = Some(self.read_text(&e)?),
                    b"desc" => point.description = Some(self.read_text(&e)?),
                    b"src" => point.source = Some(self.read_text(&e)?),
                    b"link" => {
                        let link = self.parse_link(&e)?;
                        if point.link.is_none() {
                            point.link = Some(link);
                        } else if point.link2.is_none() {
                            point.link2 = Some(link);
                        }
                        // Third and later links are dropped, matching the
                        // two-link storage schema.
                    }
                    b"sym" => point.symbol = Some(self.read_text(&e)?),
                    b"type" => point.point_type = Some(self.read_text(&e)?),
                    b"fix" => point.fix = Some(self.read_text(&e)?),
                    b"sat" => point.sat = Some(self.read_text(&e)?),
                    b"hdop" => point.hdop = Some(self.read_text(&e)?),
                    b"vdop" => point.vdop = Some(self.read_text(&e)?),
                    b"pdop" => point.pdop = Some(self.read_text(&e)?),
                    b"ageofdgpsdata" => point.age_of_dgps_data = Some(self.read_text(&e)?),
                    b"dgpsid" => point.dgps_id = Some(self.read_text(&e)?),
                    b"course" => point.course = Some(self.read_text(&e)?),
                    b"speed" => point.speed = Some(self.read_text(&e)?),
                    _ => self.skip(&e)?,
                },
                Ok(Event::Empty(e)) => {
                    // <link href=".."/> with no children
                    if e.local_name().as_ref() == b"link" {
                        let link = self.link_from_attrs(&e)?;
                        if point.link.is_none() {
                            point.link = Some(link);
                        } else if point.link2.is_none() {
                            point.link2 = Some(link);
                        }
                    }
                }
                Ok(Event::End(e)) if e.name().0 == end_name.as_slice() => break,
                Ok(Event::Eof) => return Err(self.unterminated(&element)),
                Err(e) => return Err(self.xml_error(e)),
                _ => {}
            }
        }

        Ok(point)
    }

    /// The href attribute of a `<link>` element.
    fn link_from_attrs(&mut self, start: &BytesStart<'_>) -> Result<GpxLink> {
        let mut link = GpxLink::default();
        for attr_result in start.attributes() {
            let attr = attr_result.map_err(|e| self.xml_error(e.into()))?;
            if attr.key.local_name().as_ref() == b"href" {
                link.href = String::from_utf8_lossy(&attr.value).into_owned();
            }
        }
        Ok(link)
    }

    /// Parse a `<link>` element: href attribute, optional text/type children.
    fn parse_link(&mut self, start: &BytesStart<'_>) -> Result<GpxLink> {
        let mut link = self.link_from_attrs(start)?;

        loop {
            match self.reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"text" => link.text = Some(self.read_text(&e)?),
                    b"type" => link.link_type = Some(self.read_text(&e)?),
                    _ => self.skip(&e)?,
                },
                Ok(Event::End(e)) if e.local_name().as_ref() == b"link" => break,
                Ok(Event::Eof) => return Err(self.unterminated("link")),
                Err(e) => return Err(self.xml_error(e)),
                _ => {}
            }
        }

        Ok(link)
    }

    /// Parse a `<rte>` element.
    fn parse_route(&mut self) -> Result<GpxRoute> {
        let mut route = GpxRoute::default();

        loop {
            match self.reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"name" => route.name = Some(self.read_text(&e)?),
                    b"cmt" => route.comment = Some(self.read_text(&e)?),
                    b"desc" => route.description = Some(self.read_text(&e)?),
                    b"src" => route.source = Some(self.read_text(&e)?),
                    b"link" => route.link = Some(self.parse_link(&e)?),
                    b"number" => route.number = Some(self.read_text(&e)?),
                    b"type" => route.route_type = Some(self.read_text(&e)?),
                    b"rtept" => route.points.push(self.parse_point(&e)?),
                    _ => self.skip(&e)?,
                },
                Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"rtept" => route.points.push(self.parse_empty_point(&e)?),
                    b"link" => route.link = Some(self.link_from_attrs(&e)?),
                    _ => {}
                },
                Ok(Event::End(e)) if e.local_name().as_ref() == b"rte" => break,
                Ok(Event::Eof) => return Err(self.unterminated("rte")),
                Err(e) => return Err(self.xml_error(e)),
                _ => {}
            }
        }

        Ok(route)
    }

    /// Parse a `<trk>` element.
    fn parse_track(&mut self) -> Result<GpxTrack> {
        let mut track = GpxTrack::default();

        loop {
            match self.reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"name" => track.name = Some(self.read_text(&e)?),
                    b"cmt" => track.comment = Some(self.read_text(&e)?),
                    b"desc" => track.description = Some(self.read_text(&e)?),
                    b"src" => track.source = Some(self.read_text(&e)?),
                    b"link" => track.link = Some(self.parse_link(&e)?),
                    b"number" => track.number = Some(self.read_text(&e)?),
                    b"type" => track.track_type = Some(self.read_text(&e)?),
                    b"trkseg" => {
                        let seg = self.parse_segment()?;
                        if !seg.points.is_empty() {
                            track.segments.push(seg);
                        }
                    }
                    _ => self.skip(&e)?,
                },
                Ok(Event::Empty(e)) => {
                    if e.local_name().as_ref() == b"link" {
                        track.link = Some(self.link_from_attrs(&e)?);
                    }
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == b"trk" => break,
                Ok(Event::Eof) => return Err(self.unterminated("trk")),
                Err(e) => return Err(self.xml_error(e)),
                _ => {}
            }
        }

        Ok(track)
    }

    /// Parse a `<trkseg>` element.
    fn parse_segment(&mut self) -> Result<GpxSegment> {
        let mut segment = GpxSegment::default();

        loop {
            match self.reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"trkpt" => segment.points.push(self.parse_point(&e)?),
                    _ => self.skip(&e)?,
                },
                Ok(Event::Empty(e)) => {
                    if e.local_name().as_ref() == b"trkpt" {
                        segment.points.push(self.parse_empty_point(&e)?);
                    }
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == b"trkseg" => break,
                Ok(Event::Eof) => return Err(self.unterminated("trkseg")),
                Err(e) => return Err(self.xml_error(e)),
                _ => {}
            }
        }

        Ok(segment)
    }

    /// Skip an element and everything inside it (extensions, unknowns).
    fn skip(&mut self, start: &BytesStart<'_>) -> Result<()> {
        self.reader
            .read_to_end(start.name())
            .map_err(|e| self.xml_error(e))?;
        Ok(())
    }

    /// Read text content of an element as an owned String. Handles plain
    /// text, CDATA sections and entity references.
    fn read_text(&mut self, start: &BytesStart<'_>) -> Result<String> {
        let element = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let end_name = start.name().0.to_vec();
        let mut text = String::new();

        loop {
            match self.reader.read_event() {
                Ok(Event::Text(e)) => {
                    text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default());
                }
                Ok(Event::CData(e)) => {
                    text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default());
                }
                Ok(Event::GeneralRef(e)) => {
                    if let Ok(Some(ch)) = e.resolve_char_ref() {
                        text.push(ch);
                    } else {
                        match std::str::from_utf8(e.as_ref()).unwrap_or_default() {
                            "amp" => text.push('&'),
                            "lt" => text.push('<'),
                            "gt" => text.push('>'),
                            "quot" => text.push('"'),
                            "apos" => text.push('\''),
                            _ => {}
                        }
                    }
                }
                Ok(Event::End(e)) if e.name().0 == end_name.as_slice() => break,
                Ok(Event::Eof) => return Err(self.unterminated(&element)),
                Err(e) => return Err(self.xml_error(e)),
                _ => {}
            }
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpx::GpxDocument;

    #[test]
    fn test_full_waypoint_schema() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1">
  <wpt lat="-41.2865" lon="174.7762">
    <ele>31.5</ele>
    <time>2020-01-01T00:00:00Z</time>
    <magvar>22.5</magvar>
    <geoidheight>17.0</geoidheight>
    <name>Pylon</name>
    <cmt>wind turbine access</cmt>
    <desc>Access gate below the turbine</desc>
    <src>eTrex 30</src>
    <link href="https://example.nz/pylon"><text>photo</text><type>image/jpeg</type></link>
    <sym>Flag, Blue</sym>
    <type>infrastructure</type>
    <fix>3d</fix>
    <sat>9</sat>
    <hdop>1.1</hdop>
    <vdop>1.8</vdop>
    <pdop>2.1</pdop>
    <ageofdgpsdata>4.0</ageofdgpsdata>
    <dgpsid>212</dgpsid>
  </wpt>
</gpx>"#;
        let doc = GpxDocument::parse(xml, "full.gpx").unwrap();
        let p = &doc.waypoints[0];
        assert_eq!(p.ele, Some(31.5));
        assert_eq!(p.time.as_deref(), Some("2020-01-01T00:00:00Z"));
        assert_eq!(p.magvar.as_deref(), Some("22.5"));
        assert_eq!(p.geoidheight.as_deref(), Some("17.0"));
        assert_eq!(p.name.as_deref(), Some("Pylon"));
        assert_eq!(p.comment.as_deref(), Some("wind turbine access"));
        assert_eq!(p.source.as_deref(), Some("eTrex 30"));
        assert_eq!(p.symbol.as_deref(), Some("Flag, Blue"));
        assert_eq!(p.fix.as_deref(), Some("3d"));
        assert_eq!(p.sat.as_deref(), Some("9"));
        assert_eq!(p.hdop.as_deref(), Some("1.1"));
        assert_eq!(p.vdop.as_deref(), Some("1.8"));
        assert_eq!(p.pdop.as_deref(), Some("2.1"));
        assert_eq!(p.age_of_dgps_data.as_deref(), Some("4.0"));
        assert_eq!(p.dgps_id.as_deref(), Some("212"));
        let link = p.link.as_ref().unwrap();
        assert_eq!(link.href, "https://example.nz/pylon");
        assert_eq!(link.text.as_deref(), Some("photo"));
        assert_eq!(link.link_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_track_point_course_speed() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.0">
  <trk><trkseg>
    <trkpt lat="-41.0" lon="175.0"><course>180.0</course><speed>1.4</speed></trkpt>
  </trkseg></trk>
</gpx>"#;
        let doc = GpxDocument::parse(xml, "t.gpx").unwrap();
        let p = &doc.tracks[0].segments[0].points[0];
        assert_eq!(p.course.as_deref(), Some("180.0"));
        assert_eq!(p.speed.as_deref(), Some("1.4"));
    }

    #[test]
    fn test_two_links_kept_third_dropped() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1">
  <wpt lat="-41.0" lon="175.0">
    <link href="https://a.example"/>
    <link href="https://b.example"/>
    <link href="https://c.example"/>
  </wpt>
</gpx>"#;
        let doc = GpxDocument::parse(xml, "links.gpx").unwrap();
        let p = &doc.waypoints[0];
        assert_eq!(p.link.as_ref().unwrap().href, "https://a.example");
        assert_eq!(p.link2.as_ref().unwrap().href, "https://b.example");
    }

    #[test]
    fn test_unterminated_track_fails() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1">
  <trk><trkseg><trkpt lat="-41.0" lon="175.0"/>"#;
        let err = GpxDocument::parse(xml, "broken.gpx").unwrap_err();
        assert!(matches!(err, TripError::MalformedDocument { .. }));
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_non_numeric_lat_fails() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1"><wpt lat="south" lon="175.0"/></gpx>"#;
        let err = GpxDocument::parse(xml, "bad.gpx").unwrap_err();
        assert!(err.to_string().contains("invalid lat attribute 'south'"));
    }

    #[test]
    fn test_missing_lon_fails() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1"><wpt lat="-41.0"/></gpx>"#;
        let err = GpxDocument::parse(xml, "bad.gpx").unwrap_err();
        assert!(err.to_string().contains("missing lon attribute"));
    }

    #[test]
    fn test_out_of_range_coordinates_survive_parse() {
        // Range violations are a per-point ingestion concern, not a
        // structural one.
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1"><wpt lat="-95.0" lon="175.0"/></gpx>"#;
        let doc = GpxDocument::parse(xml, "far.gpx").unwrap();
        assert!(!doc.waypoints[0].in_range());
    }

    #[test]
    fn test_extensions_skipped() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1">
  <trk><trkseg>
    <trkpt lat="-41.0" lon="175.0">
      <extensions><gpxtpx:hr xmlns:gpxtpx="urn:x">150</gpxtpx:hr></extensions>
    </trkpt>
  </trkseg></trk>
</gpx>"#;
        let doc = GpxDocument::parse(xml, "ext.gpx").unwrap();
        assert_eq!(doc.tracks[0].segments[0].points.len(), 1);
    }

    #[test]
    fn test_empty_segment_dropped() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1">
  <trk>
    <trkseg></trkseg>
    <trkseg><trkpt lat="-41.0" lon="175.0"/></trkseg>
  </trk>
</gpx>"#;
        let doc = GpxDocument::parse(xml, "seg.gpx").unwrap();
        assert_eq!(doc.tracks[0].segments.len(), 1);
    }

    #[test]
    fn test_cdata_and_entities() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1">
  <wpt lat="-41.0" lon="175.0"><name><![CDATA[Saddle & Spur]]></name></wpt>
  <wpt lat="-41.1" lon="175.1"><name>Bush &amp; Beech</name></wpt>
</gpx>"#;
        let doc = GpxDocument::parse(xml, "n.gpx").unwrap();
        assert_eq!(doc.waypoints[0].name.as_deref(), Some("Saddle & Spur"));
        assert_eq!(doc.waypoints[1].name.as_deref(), Some("Bush & Beech"));
    }

    #[test]
    fn test_byte_guard() {
        let huge = vec![b' '; MAX_DOCUMENT_BYTES + 1];
        let err = GpxDocument::parse(&huge, "huge.gpx").unwrap_err();
        assert!(matches!(err, TripError::DocumentTooLarge { unit: "bytes", .. }));
    }

    #[test]
    fn test_document_order_preserved() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1">
  <rte><name>B</name></rte>
  <rte><name>A</name></rte>
</gpx>"#;
        let doc = GpxDocument::parse(xml, "o.gpx").unwrap();
        assert_eq!(doc.routes[0].name.as_deref(), Some("B"));
        assert_eq!(doc.routes[1].name.as_deref(), Some("A"));
    }
}

//! GeoJSON reading/writing
//!
//! Only `Polygon` and `MultiPolygon` geometries are accepted; everything is
//! written back as `MultiPolygon`. Positions may carry extra dimensions,
//! only longitude and latitude are kept.

use crate::error::{Error, Result};
use crate::vector::{Feature, FeatureCollection, FeatureId, Properties};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Deserialize)]
struct RawCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    properties: Option<Properties>,
    #[serde(default)]
    geometry: Option<RawGeometry>,
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

type RawRing = Vec<Vec<f64>>;

#[derive(Serialize)]
struct OutCollection<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<OutFeature<'a>>,
}

#[derive(Serialize)]
struct OutFeature<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    properties: &'a Properties,
    geometry: OutGeometry,
}

#[derive(Serialize)]
struct OutGeometry {
    #[serde(rename = "type")]
    kind: &'static str,
    coordinates: Vec<Vec<Vec<[f64; 2]>>>,
}

/// Read a GeoJSON FeatureCollection file
///
/// The collection is validated before it is returned, so malformed input
/// surfaces here rather than part-way through a merge run.
pub fn read_geojson<P: AsRef<Path>>(path: P) -> Result<FeatureCollection> {
    let file = File::open(path.as_ref())?;
    let raw: RawCollection = serde_json::from_reader(BufReader::new(file))?;
    decode_collection(raw)
}

/// Read a GeoJSON FeatureCollection from an in-memory string
pub fn read_geojson_from_str(text: &str) -> Result<FeatureCollection> {
    let raw: RawCollection = serde_json::from_str(text)?;
    decode_collection(raw)
}

/// Write a FeatureCollection as GeoJSON
pub fn write_geojson<P: AsRef<Path>>(collection: &FeatureCollection, path: P, pretty: bool) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    let out = encode_collection(collection);
    if pretty {
        serde_json::to_writer_pretty(&mut writer, &out)?;
    } else {
        serde_json::to_writer(&mut writer, &out)?;
    }
    writer.flush()?;
    Ok(())
}

/// Serialize a FeatureCollection to a GeoJSON string
pub fn write_geojson_to_string(collection: &FeatureCollection, pretty: bool) -> Result<String> {
    let out = encode_collection(collection);
    let text = if pretty {
        serde_json::to_string_pretty(&out)?
    } else {
        serde_json::to_string(&out)?
    };
    Ok(text)
}

fn decode_collection(raw: RawCollection) -> Result<FeatureCollection> {
    if raw.kind != "FeatureCollection" {
        return Err(Error::Other(format!(
            "expected a GeoJSON FeatureCollection, found '{}'",
            raw.kind
        )));
    }

    let collection = raw
        .features
        .into_iter()
        .enumerate()
        .map(|(index, f)| decode_feature(index, f))
        .collect::<Result<FeatureCollection>>()?;

    collection.validate()?;
    Ok(collection)
}

fn decode_feature(index: usize, raw: RawFeature) -> Result<Feature> {
    let geometry = raw
        .geometry
        .ok_or_else(|| Error::geometry(index, "feature has no geometry"))?;

    let multi = match geometry.kind.as_str() {
        "Polygon" => {
            let rings: Vec<RawRing> = coordinates(index, geometry.coordinates)?;
            MultiPolygon(vec![decode_polygon(index, rings)?])
        }
        "MultiPolygon" => {
            let polygons: Vec<Vec<RawRing>> = coordinates(index, geometry.coordinates)?;
            MultiPolygon(
                polygons
                    .into_iter()
                    .map(|rings| decode_polygon(index, rings))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        other => {
            return Err(Error::geometry(
                index,
                format!("unsupported geometry type '{other}'"),
            ))
        }
    };

    Ok(Feature::new(multi).with_properties(raw.properties.unwrap_or_default()))
}

fn coordinates<T: serde::de::DeserializeOwned>(index: usize, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::geometry(index, format!("bad coordinates: {e}")))
}

fn decode_polygon(index: usize, rings: Vec<RawRing>) -> Result<Polygon<f64>> {
    let mut rings = rings.into_iter().map(|ring| decode_ring(index, ring));
    let exterior = rings
        .next()
        .ok_or_else(|| Error::geometry(index, "polygon has no rings"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn decode_ring(index: usize, ring: RawRing) -> Result<LineString<f64>> {
    let coords = ring
        .into_iter()
        .map(|pos| match pos.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(Error::geometry(index, "position has fewer than two values")),
        })
        .collect::<Result<Vec<_>>>()?;

    if coords.first() != coords.last() {
        return Err(Error::geometry(index, "ring is not closed"));
    }
    Ok(LineString::new(coords))
}

fn encode_collection(collection: &FeatureCollection) -> OutCollection<'_> {
    OutCollection {
        kind: "FeatureCollection",
        features: collection
            .iter()
            .map(|f| OutFeature {
                kind: "Feature",
                id: f.id.map(|FeatureId(id)| id),
                properties: &f.properties,
                geometry: encode_geometry(&f.geometry),
            })
            .collect(),
    }
}

fn encode_geometry(geometry: &MultiPolygon<f64>) -> OutGeometry {
    let ring = |ls: &LineString<f64>| ls.0.iter().map(|c| [c.x, c.y]).collect::<Vec<_>>();
    OutGeometry {
        kind: "MultiPolygon",
        coordinates: geometry
            .0
            .iter()
            .map(|p| {
                std::iter::once(p.exterior())
                    .chain(p.interiors().iter())
                    .map(ring)
                    .collect()
            })
            .collect(),
    }
}

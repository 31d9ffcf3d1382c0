//! Zone boundary loading.
//!
//! Boundaries come either as a directory of single-feature GeoJSON files or
//! as one multi-feature collection. Zones are numbered from 1 in the order
//! they are read; 0 is reserved for "outside every zone".
use std::fs;
use std::path::Path;

use geo::{BooleanOps, Coord, Geometry, LineString, MultiPolygon, Polygon};
use geojson::{Feature, GeoJson};
use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::config::BoundarySource;
use crate::error::{PipelineError, Result};

/// Property keys tried, in order, for the zone name in directory mode.
const FILE_NAME_KEYS: &[&str] = &["name", "NAME", "ward", "WardName", "NAMELATIN"];
/// Property keys tried, in order, for the zone name in collection mode.
const COLLECTION_NAME_KEYS: &[&str] = &["name", "ward", "NAME", "WardName", "BoroName", "JUR_NAME"];
const CODE_KEYS: &[&str] = &["BoroCode", "code", "CODE", "GSS_CODE"];

const BOUNDARY_SUFFIXES: &[&str] = &[".geo.json", ".geojson"];
const TEMP_PREFIX: &str = "temp_";

/// An administrative polygon with a stable 1-based id.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: u32,
    pub name: String,
    pub code: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

pub fn load_zones(source: &BoundarySource) -> Result<Vec<Zone>> {
    let zones = match source {
        BoundarySource::Directory(dir) => load_zone_directory(dir)?,
        BoundarySource::Collection(path) => load_zone_collection(path)?,
    };
    info!("loaded {} zones", zones.len());
    Ok(zones)
}

/// Read every boundary file in `dir` in lexicographic order.
pub fn load_zone_directory(dir: &Path) -> Result<Vec<Zone>> {
    let io_err = |source| PipelineError::Io { path: dir.to_path_buf(), source };

    let mut files: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let fname = entry.file_name().to_string_lossy().into_owned();
        if fname.starts_with(TEMP_PREFIX) {
            continue;
        }
        if BOUNDARY_SUFFIXES.iter().any(|s| fname.ends_with(s)) && entry.path().is_file() {
            files.push(fname);
        }
    }
    files.sort();

    let mut zones = Vec::new();
    for fname in &files {
        let doc = read_json(&dir.join(fname))?;
        let kind = doc.get("type").and_then(Value::as_str);
        if !matches!(kind, Some("Feature" | "FeatureCollection")) {
            warn!("skipping {fname}: top-level type {kind:?} is not a feature");
            continue;
        }
        let features = match decode(doc, fname)? {
            GeoJson::FeatureCollection(fc) => fc.features,
            GeoJson::Feature(feat) => vec![feat],
            GeoJson::Geometry(_) => continue,
        };

        for feat in features {
            let geometry = feature_geometry(&feat, fname)?;
            let props = feat.properties.as_ref();
            let raw_name = first_string(props, FILE_NAME_KEYS).unwrap_or_else(|| file_stem(fname));
            let id = zones.len() as u32 + 1;
            debug!("zone {id} from {fname}");
            zones.push(Zone {
                id,
                name: normalize_name(&raw_name),
                code: first_code(props),
                geometry,
            });
        }
    }
    Ok(zones)
}

/// Read one feature collection; feature `i` becomes zone `i + 1`.
pub fn load_zone_collection(path: &Path) -> Result<Vec<Zone>> {
    let doc = read_json(path)?;
    zones_from_collection(doc, &path.display().to_string())
}

pub fn zones_from_collection(doc: Value, source_name: &str) -> Result<Vec<Zone>> {
    let GeoJson::FeatureCollection(fc) = decode(doc, source_name)? else {
        return Err(PipelineError::InvalidGeometry {
            source_name: source_name.to_string(),
            reason: "expected a FeatureCollection".into(),
        });
    };

    fc.features
        .iter()
        .enumerate()
        .map(|(i, feat)| {
            let id = i as u32 + 1;
            let geometry = feature_geometry(feat, &format!("{source_name} feature {id}"))?;
            let props = feat.properties.as_ref();
            let raw_name = first_string(props, COLLECTION_NAME_KEYS).unwrap_or_else(|| format!("Ward {id}"));
            Ok(Zone {
                id,
                name: normalize_name(&raw_name),
                code: first_code(props),
                geometry,
            })
        })
        .collect()
}

fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn decode(doc: Value, source_name: &str) -> Result<GeoJson> {
    GeoJson::from_json_value(doc).map_err(|e| PipelineError::InvalidGeometry {
        source_name: source_name.to_string(),
        reason: e.to_string(),
    })
}

fn feature_geometry(feat: &Feature, source_name: &str) -> Result<MultiPolygon<f64>> {
    let invalid = |reason: String| PipelineError::InvalidGeometry { source_name: source_name.to_string(), reason };
    let geometry = feat.geometry.clone().ok_or_else(|| invalid("feature has no geometry".into()))?;
    let repaired = repair(&to_multipolygon(geometry).map_err(invalid)?);
    if repaired.0.is_empty() {
        warn!("{source_name}: geometry is empty after repair; the zone will receive no pixels");
    }
    Ok(repaired)
}

/// Convert a GeoJSON Polygon or MultiPolygon; every other type is rejected.
pub fn to_multipolygon(geometry: geojson::Geometry) -> std::result::Result<MultiPolygon<f64>, String> {
    let kind = match &geometry.value {
        geojson::Value::Polygon(_) | geojson::Value::MultiPolygon(_) => None,
        geojson::Value::Point(_) => Some("Point"),
        geojson::Value::MultiPoint(_) => Some("MultiPoint"),
        geojson::Value::LineString(_) => Some("LineString"),
        geojson::Value::MultiLineString(_) => Some("MultiLineString"),
        geojson::Value::GeometryCollection(_) => Some("GeometryCollection"),
    };
    if let Some(kind) = kind {
        return Err(format!("unsupported geometry type {kind}"));
    }
    match Geometry::<f64>::try_from(geometry).map_err(|e| e.to_string())? {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Ok(mp),
        _ => Err("geometry did not convert to polygons".into()),
    }
}

/// Single validity fix-up: strip degenerate vertices and rings, then rebuild
/// the shape from its linework with a boolean union against the empty set.
///
/// The union fills even-odd, so self-intersections split into valid lobes and
/// regions covered by an even number of parts (overlaps between MultiPolygon
/// parts) drop out. This matches the `linework` method of shapely's
/// `make_valid`.
pub fn repair(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let cleaned = MultiPolygon::new(geometry.0.iter().filter_map(clean_polygon).collect());
    if cleaned.0.is_empty() {
        return cleaned;
    }
    let resolved = cleaned.union(&MultiPolygon::new(Vec::new()));
    if resolved.0.is_empty() { cleaned } else { resolved }
}

fn clean_polygon(poly: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = clean_ring(poly.exterior())?;
    let interiors = poly.interiors().iter().filter_map(clean_ring).collect();
    Some(Polygon::new(exterior, interiors))
}

fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for c in ring.coords().filter(|c| c.x.is_finite() && c.y.is_finite()) {
        if coords.last() != Some(c) {
            coords.push(*c);
        }
    }
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    // Polygon::new closes the ring again.
    (coords.len() >= 3).then(|| LineString::new(coords))
}

fn first_string(props: Option<&Map<String, Value>>, keys: &[&str]) -> Option<String> {
    let props = props?;
    keys.iter()
        .filter_map(|k| props.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_code(props: Option<&Map<String, Value>>) -> Option<String> {
    let props = props?;
    CODE_KEYS.iter().find_map(|k| match props.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// `"adachi-ku.geo.json"` → `"adachi-ku"`.
fn file_stem(fname: &str) -> String {
    BOUNDARY_SUFFIXES
        .iter()
        .find_map(|s| fname.strip_suffix(s))
        .unwrap_or(fname)
        .to_string()
}

/// Underscores and hyphens become spaces; every alphabetic run is
/// capitalised and the rest of the run lower-cased.
pub fn normalize_name(raw: &str) -> String {
    let spaced = raw.replace(['_', '-'], " ");
    let mut out = String::with_capacity(spaced.len());
    let mut in_word = false;
    for ch in spaced.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

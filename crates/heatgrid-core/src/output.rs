//! Output documents consumed by the visualization layer.
//!
//! The grid document carries every pixel (row-major, length `width × height`);
//! numeric layers are zeroed outside the zoned region. The zones document
//! carries one flat record per zone.
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::normalize::LandCoverClass;
use crate::raster::{BoundingBox, GridSpec, Raster};
use crate::rasterize::ZoneRaster;
use crate::zonal::{modal_class, LayerStats, ZoneSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDocument {
    pub city: String,
    pub crs: String,
    pub width: usize,
    pub height: usize,
    pub bbox: BoundingBox,
    pub ward_ids: Vec<u32>,
    pub ndvi: Vec<f32>,
    #[serde(rename = "lst_day_C")]
    pub lst_day_c: Vec<f32>,
    #[serde(rename = "lst_night_C")]
    pub lst_night_c: Vec<f32>,
    pub lc: Vec<LandCoverClass>,
    pub ndvi_min: f32,
    pub ndvi_max: f32,
    pub lst_day_min: f32,
    pub lst_day_max: f32,
    pub lst_night_min: f32,
    pub lst_night_max: f32,
    pub lc_max: LandCoverClass,
}

/// Gap-filled layers ready for serialization.
pub struct FilledLayers<'a> {
    pub ndvi: &'a Raster<f32>,
    pub lst_day: &'a Raster<f32>,
    pub lst_night: &'a Raster<f32>,
    pub land_cover: &'a Raster<LandCoverClass>,
}

impl GridDocument {
    pub fn build(
        city: &str,
        crs: &str,
        grid: &GridSpec,
        zone_raster: &ZoneRaster,
        mask: &[bool],
        layers: FilledLayers<'_>,
    ) -> Self {
        let zeroed = |layer: &Raster<f32>| -> Vec<f32> {
            layer.data.iter().zip(mask).map(|(&v, &m)| if m { v } else { 0.0 }).collect()
        };
        let range = |layer: &Raster<f32>| layer.masked_range(mask).unwrap_or((f32::NAN, f32::NAN));

        let (ndvi_min, ndvi_max) = range(layers.ndvi);
        let (lst_day_min, lst_day_max) = range(layers.lst_day);
        let (lst_night_min, lst_night_max) = range(layers.lst_night);
        let lc_max = modal_class(
            layers.land_cover.data.iter().zip(mask).filter(|(_, &m)| m).map(|(&c, _)| c),
        )
        .unwrap_or(LandCoverClass::NoData);

        Self {
            city: city.to_string(),
            crs: crs.to_string(),
            width: grid.width,
            height: grid.height,
            bbox: grid.bbox,
            ward_ids: zone_raster.data.clone(),
            ndvi: zeroed(layers.ndvi),
            lst_day_c: zeroed(layers.lst_day),
            lst_night_c: zeroed(layers.lst_night),
            lc: layers.land_cover.data.clone(),
            ndvi_min,
            ndvi_max,
            lst_day_min,
            lst_day_max,
            lst_night_min,
            lst_night_max,
            lc_max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZonesDocument {
    pub city: String,
    pub crs: String,
    pub num_wards: usize,
    pub wards: Vec<ZoneSummary>,
}

impl ZonesDocument {
    pub fn new(city: &str, crs: &str, wards: Vec<ZoneSummary>) -> Self {
        Self {
            city: city.to_string(),
            crs: crs.to_string(),
            num_wards: wards.len(),
            wards,
        }
    }
}

impl Serialize for ZoneSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Centroid {
            lon: f64,
            lat: f64,
        }

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("name", &self.name)?;
        if let Some(code) = &self.code {
            map.serialize_entry("code", code)?;
        }
        map.serialize_entry("centroid", &Centroid { lon: self.centroid.lon, lat: self.centroid.lat })?;
        map.serialize_entry("bbox", &self.bbox)?;
        map.serialize_entry("pixel_count", &self.pixel_count)?;
        map.serialize_entry("lc_mode", &self.lc_mode)?;
        for (prefix, stats) in [("ndvi", &self.ndvi), ("lst_day", &self.lst_day), ("lst_night", &self.lst_night)] {
            serialize_stats(&mut map, prefix, stats)?;
        }
        map.end()
    }
}

fn serialize_stats<M: SerializeMap>(map: &mut M, prefix: &str, s: &LayerStats) -> Result<(), M::Error> {
    let fields = [
        ("min", s.min),
        ("q1", s.q1),
        ("median", s.median),
        ("q3", s.q3),
        ("max", s.max),
        ("mean", s.mean),
        ("std", s.std),
    ];
    for (name, value) in fields {
        map.serialize_entry(&format!("{prefix}_{name}"), &value)?;
    }
    Ok(())
}

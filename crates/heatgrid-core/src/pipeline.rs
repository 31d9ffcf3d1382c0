//! Per-city orchestrator: runs every stage in order and returns both
//! documents, or the first fatal error. Nothing is emitted for a failed city.

use log::info;

use crate::boundaries::Zone;
use crate::config::{CityConfig, PipelineParams};
use crate::error::Result;
use crate::gapfill::fill_layer;
use crate::normalize::{PhysicalLayers, RawArray};
use crate::output::{FilledLayers, GridDocument, ZonesDocument};
use crate::raster::{GridSpec, LayerKind};
use crate::rasterize::{inside_mask, rasterize_zones};
use crate::zonal::aggregate_zones;

/// Decoded rasters for one city, as produced by the raster reader.
#[derive(Debug, Clone)]
pub struct RawLayers {
    /// `(H, W)` or `(1, H, W)`.
    pub ndvi: RawArray<f32>,
    /// `(H, W, 2)` or `(2, H, W)`, day band first.
    pub lst: RawArray<f32>,
    /// `(H, W)` or `(1, H, W)` class codes.
    pub land_cover: RawArray<i32>,
}

#[derive(Debug, Clone)]
pub struct CityOutput {
    pub grid: GridDocument,
    pub zones: ZonesDocument,
}

/// Run the full per-city pipeline.
///
/// Pipeline order:
///   1. Normalize raw layers (shape checks, physical units)
///   2. Rasterize zones onto the pixel grid
///   3. Gap-fill NDVI, LST day, LST night inside the zoned region
///   4. Zonal statistics
///   5. Assemble the grid and zones documents
pub fn preprocess_city(
    city: &CityConfig,
    zones: &[Zone],
    raw: RawLayers,
    params: &PipelineParams,
) -> Result<CityOutput> {
    // ── 1. Physical layers ──────────────────────────────────────────────
    let layers = PhysicalLayers::from_raw(raw.ndvi, raw.lst, raw.land_cover)?;
    let grid = GridSpec::new(layers.ndvi.width, layers.ndvi.height, city.bbox);
    info!("{}: {}×{} grid, {} zones", city.label, grid.width, grid.height, zones.len());

    // ── 2. Zone assignment ──────────────────────────────────────────────
    let zone_raster = rasterize_zones(&grid, zones);
    let mask = inside_mask(&zone_raster);

    // ── 3. Gap filling ──────────────────────────────────────────────────
    let iterations = params.gap_fill_iterations;
    let filled = PhysicalLayers {
        ndvi: fill_layer(&layers.ndvi, &mask, iterations, LayerKind::Ndvi)?,
        lst_day: fill_layer(&layers.lst_day, &mask, iterations, LayerKind::LstDay)?,
        lst_night: fill_layer(&layers.lst_night, &mask, iterations, LayerKind::LstNight)?,
        land_cover: layers.land_cover,
    };

    // ── 4. Zonal statistics ─────────────────────────────────────────────
    let summaries = aggregate_zones(&grid, &zone_raster, zones, &filled);
    info!("{}: summarised {} zones", city.label, summaries.len());

    // ── 5. Documents ────────────────────────────────────────────────────
    let grid_doc = GridDocument::build(
        &city.label,
        &city.crs,
        &grid,
        &zone_raster,
        &mask,
        FilledLayers {
            ndvi: &filled.ndvi,
            lst_day: &filled.lst_day,
            lst_night: &filled.lst_night,
            land_cover: &filled.land_cover,
        },
    );
    let zones_doc = ZonesDocument::new(&city.label, &city.crs, summaries);

    Ok(CityOutput { grid: grid_doc, zones: zones_doc })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoundarySource, OutputPaths, RasterPaths};
    use crate::error::PipelineError;
    use crate::raster::BoundingBox;
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};

    fn city() -> CityConfig {
        CityConfig {
            id: "test".into(),
            label: "Test City".into(),
            bbox: BoundingBox::new(0.0, 0.0, 4.0, 3.0),
            boundaries: BoundarySource::Collection("unused.json".into()),
            rasters: RasterPaths {
                ndvi: "ndvi.tif".into(),
                lst: "lst.tif".into(),
                land_cover: "lc.tif".into(),
            },
            outputs: OutputPaths { grid: "grid.json".into(), zones: "zones.json".into() },
            crs: "EPSG:102400".into(),
        }
    }

    fn zones() -> Vec<Zone> {
        // Zone 1 covers columns 0–1, zone 2 column 2; column 3 is outside.
        let rect = |x0: f64, x1: f64| {
            MultiPolygon::new(vec![polygon![(x: x0, y: 0.0), (x: x1, y: 0.0), (x: x1, y: 3.0), (x: x0, y: 3.0)]])
        };
        vec![
            Zone { id: 1, name: "West".into(), code: None, geometry: rect(0.0, 2.0) },
            Zone { id: 2, name: "East".into(), code: Some("E".into()), geometry: rect(2.0, 3.0) },
        ]
    }

    fn raw(ndvi: Vec<f32>, lc: Vec<i32>) -> RawLayers {
        let n = ndvi.len();
        RawLayers {
            ndvi: RawArray::new(vec![3, 4], ndvi),
            lst: RawArray::new(
                vec![2, 3, 4],
                (0..2 * n).map(|i| if i < n { 15000.0 } else { 14000.0 }).collect(),
            ),
            land_cover: RawArray::new(vec![3, 4], lc),
        }
    }

    #[test]
    fn end_to_end_fills_zeroes_and_summarises() {
        let ndvi = vec![
            5000.0, 0.0, 3000.0, 9000.0,
            5000.0, 5000.0, -3000.0, 9000.0,
            5000.0, 5000.0, 3000.0, -3000.0,
        ];
        let out = preprocess_city(&city(), &zones(), raw(ndvi, vec![13; 12]), &PipelineParams::default()).unwrap();

        let grid = &out.grid;
        assert_eq!((grid.width, grid.height), (4, 3));
        assert_eq!(grid.ward_ids, vec![1, 1, 2, 0, 1, 1, 2, 0, 1, 1, 2, 0]);
        for (i, &id) in grid.ward_ids.iter().enumerate() {
            if id == 0 {
                assert_eq!(grid.ndvi[i], 0.0);
                assert_eq!(grid.lst_day_c[i], 0.0);
                assert_eq!(grid.lst_night_c[i], 0.0);
            } else {
                assert!(grid.ndvi[i].is_finite());
            }
        }
        // (0,1) filled from its in-zone neighbours 0.5 / 0.3 / 0.5
        assert_relative_eq!(grid.ndvi[1], (0.5 + 0.3 + 0.5) / 3.0, epsilon = 1e-5);
        // (1,2) filled from 0.3 above, 0.3 below, 0.5 left; column 3 is outside
        assert_relative_eq!(grid.ndvi[6], (0.3 + 0.3 + 0.5) / 3.0, epsilon = 1e-5);
        assert_relative_eq!(grid.ndvi_max, 0.5, epsilon = 1e-6);

        let zones = &out.zones;
        assert_eq!(zones.num_wards, 2);
        assert_eq!(zones.wards[0].pixel_count, 6);
        assert_eq!(zones.wards[1].pixel_count, 3);
        assert_relative_eq!(zones.wards[1].lst_night.mean.unwrap(), 6.85, epsilon = 1e-3);
    }

    #[test]
    fn layer_without_in_zone_data_aborts() {
        let mut ndvi = vec![0.0; 12];
        ndvi[3] = 5000.0; // only valid pixel lies outside every zone
        let err = preprocess_city(&city(), &zones(), raw(ndvi, vec![13; 12]), &PipelineParams::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyLayer(LayerKind::Ndvi)));
    }

    #[test]
    fn unknown_class_aborts() {
        let mut lc = vec![13; 12];
        lc[5] = 42;
        let err = preprocess_city(&city(), &zones(), raw(vec![5000.0; 12], lc), &PipelineParams::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownLandCoverCode(42)));
    }
}

//! Pixel → zone assignment by point-in-polygon on pixel centres.
//!
//! Each row first narrows the zone list to the polygons whose bounding box
//! spans that row's latitude; each pixel then checks the longitude extent
//! before the exact containment test. Candidate lists keep zone-id order, so
//! the first containing zone wins exactly as in a naive full scan.
use geo::{BoundingRect, Contains, Point, Rect};
use log::info;

use crate::boundaries::Zone;
use crate::raster::{GridSpec, Raster};

/// Zone id per pixel, 0 meaning "outside every zone".
pub type ZoneRaster = Raster<u32>;

struct Candidate<'a> {
    zone: &'a Zone,
    bounds: Rect<f64>,
}

/// Assign every pixel of `grid` to the first zone (in id order) containing its centre.
pub fn rasterize_zones(grid: &GridSpec, zones: &[Zone]) -> ZoneRaster {
    let mut ordered: Vec<&Zone> = zones.iter().collect();
    ordered.sort_by_key(|z| z.id);
    let candidates: Vec<Candidate> = ordered
        .into_iter()
        .filter_map(|zone| zone.geometry.bounding_rect().map(|bounds| Candidate { zone, bounds }))
        .collect();

    let mut raster = Raster::filled(grid.width, grid.height, 0u32);
    if grid.is_empty() {
        return raster;
    }

    let fill_row = |(row, out): (usize, &mut [u32])| {
        let lat = grid.row_to_lat(row as f64);
        let row_candidates: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.bounds.min().y <= lat && lat <= c.bounds.max().y)
            .collect();
        if row_candidates.is_empty() {
            return;
        }
        for (col, cell) in out.iter_mut().enumerate() {
            let lon = grid.col_to_lon(col as f64);
            let pt = Point::new(lon, lat);
            *cell = row_candidates
                .iter()
                .filter(|c| c.bounds.min().x <= lon && lon <= c.bounds.max().x)
                .find(|c| c.zone.geometry.contains(&pt))
                .map_or(0, |c| c.zone.id);
        }
    };

    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        raster.data.par_chunks_mut(grid.width).enumerate().for_each(fill_row);
    }
    #[cfg(not(feature = "threading"))]
    raster.data.chunks_mut(grid.width).enumerate().for_each(fill_row);

    let assigned = raster.data.iter().filter(|&&id| id != 0).count();
    info!("assigned {assigned} of {} pixels to {} zones", grid.len(), zones.len());
    raster
}

/// `true` where a pixel belongs to some zone.
pub fn inside_mask(zone_raster: &ZoneRaster) -> Vec<bool> {
    zone_raster.data.iter().map(|&id| id != 0).collect()
}

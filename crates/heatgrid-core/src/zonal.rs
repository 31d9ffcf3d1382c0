//! Per-zone summary statistics.
use log::debug;

use crate::boundaries::Zone;
use crate::normalize::{LandCoverClass, PhysicalLayers};
use crate::rasterize::ZoneRaster;
use crate::raster::GridSpec;

/// Five-number summary plus mean and population std of one layer within one
/// zone. Every statistic is `None` when the zone has no finite pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayerStats {
    pub pixel_count: usize,
    pub min: Option<f64>,
    pub q1: Option<f64>,
    pub median: Option<f64>,
    pub q3: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

impl LayerStats {
    /// Summarise the finite entries of `values`.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut v: Vec<f64> = values.into_iter().filter(|x| x.is_finite()).collect();
        if v.is_empty() {
            return Self::default();
        }
        v.sort_by(f64::total_cmp);

        let n = v.len() as f64;
        let mean = v.iter().sum::<f64>() / n;
        let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

        Self {
            pixel_count: v.len(),
            min: Some(v[0]),
            q1: Some(percentile_sorted(&v, 25.0)),
            median: Some(percentile_sorted(&v, 50.0)),
            q3: Some(percentile_sorted(&v, 75.0)),
            max: Some(v[v.len() - 1]),
            mean: Some(mean),
            std: Some(var.sqrt()),
        }
    }
}

/// Linear-interpolation percentile of ascending `sorted`, `p` in [0, 100].
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let pos = p / 100.0 * last as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(last);
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Most frequent class. Ties go to the class seen first in iteration order.
pub fn modal_class(classes: impl IntoIterator<Item = LandCoverClass>) -> Option<LandCoverClass> {
    // Insertion-ordered tally; at most 18 distinct entries.
    let mut tally: Vec<(LandCoverClass, usize)> = Vec::new();
    for class in classes {
        match tally.iter_mut().find(|(c, _)| *c == class) {
            Some((_, n)) => *n += 1,
            None => tally.push((class, 1)),
        }
    }
    let mut best: Option<(LandCoverClass, usize)> = None;
    for &(class, n) in &tally {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((class, n));
        }
    }
    best.map(|(c, _)| c)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

/// Everything the zones document reports about one zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSummary {
    pub id: u32,
    pub name: String,
    pub code: Option<String>,
    pub centroid: LonLat,
    /// `[lon(min col), lat(max row), lon(max col), lat(min row)]`, aligned to
    /// pixel centres.
    pub bbox: [f64; 4],
    pub pixel_count: usize,
    pub lc_mode: LandCoverClass,
    pub ndvi: LayerStats,
    pub lst_day: LayerStats,
    pub lst_night: LayerStats,
}

#[derive(Default)]
struct Members {
    pixels: Vec<usize>,
    min_row: usize,
    max_row: usize,
    min_col: usize,
    max_col: usize,
    row_sum: f64,
    col_sum: f64,
}

/// Summarise every zone that received at least one pixel, in ascending id order.
pub fn aggregate_zones(
    grid: &GridSpec,
    zone_raster: &ZoneRaster,
    zones: &[Zone],
    layers: &PhysicalLayers,
) -> Vec<ZoneSummary> {
    let max_id = zones.iter().map(|z| z.id).max().unwrap_or(0) as usize;
    let mut members: Vec<Option<Members>> = (0..=max_id).map(|_| None).collect();

    // One pass over the grid collects each zone's pixels in row-major order.
    for (idx, &id) in zone_raster.data.iter().enumerate() {
        if id == 0 || id as usize > max_id {
            continue;
        }
        let (r, c) = (idx / grid.width, idx % grid.width);
        let m = members[id as usize].get_or_insert_with(|| Members {
            min_row: r,
            max_row: r,
            min_col: c,
            max_col: c,
            ..Members::default()
        });
        m.pixels.push(idx);
        m.min_row = m.min_row.min(r);
        m.max_row = m.max_row.max(r);
        m.min_col = m.min_col.min(c);
        m.max_col = m.max_col.max(c);
        m.row_sum += r as f64;
        m.col_sum += c as f64;
    }

    let mut ordered: Vec<&Zone> = zones.iter().collect();
    ordered.sort_by_key(|z| z.id);

    let mut out = Vec::new();
    for zone in ordered {
        let Some(m) = members[zone.id as usize].as_ref() else {
            debug!("zone {} ({}) has no pixels; skipped", zone.id, zone.name);
            continue;
        };
        let stats = |layer: &[f32]| LayerStats::from_values(m.pixels.iter().map(|&i| layer[i] as f64));
        let ndvi = stats(layers.ndvi.data.as_slice());
        let lst_day = stats(layers.lst_day.data.as_slice());
        let lst_night = stats(layers.lst_night.data.as_slice());

        let n = m.pixels.len() as f64;
        let centroid = LonLat {
            lon: grid.col_to_lon(m.col_sum / n),
            lat: grid.row_to_lat(m.row_sum / n),
        };
        let bbox = [
            grid.col_to_lon(m.min_col as f64),
            grid.row_to_lat(m.max_row as f64),
            grid.col_to_lon(m.max_col as f64),
            grid.row_to_lat(m.min_row as f64),
        ];
        let lc_mode = modal_class(m.pixels.iter().map(|&i| layers.land_cover.data[i]))
            .unwrap_or(LandCoverClass::NoData);

        out.push(ZoneSummary {
            id: zone.id,
            name: zone.name.clone(),
            code: zone.code.clone(),
            centroid,
            bbox,
            pixel_count: ndvi.pixel_count,
            lc_mode,
            ndvi,
            lst_day,
            lst_night,
        });
    }
    out
}

//! NDVI → LST response curves built from finished grid documents.
//!
//! For each city the in-zone pixels are binned by NDVI; bins with enough
//! members contribute one `(mean NDVI, mean LST)` point, and the LST sequence
//! is smoothed with a centred moving average.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::ResponseParams;
use crate::error::{PipelineError, Result};
use crate::pooled::PooledModel;
use crate::zonal::percentile_sorted;

pub const RESPONSE_NOTE: &str =
    "Curves are NDVI-binned & smoothed LST averages per city. Use these for the what-if greenness simulator.";

// ── Pixel extraction ─────────────────────────────────────────────────────────

fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

/// The subset of a grid document the response stage reads.
#[derive(Debug, Deserialize)]
pub struct GridPixels {
    pub ward_ids: Vec<u32>,
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub ndvi: Vec<f32>,
    #[serde(rename = "lst_day_C", deserialize_with = "null_as_nan_vec")]
    pub lst_day: Vec<f32>,
    #[serde(rename = "lst_night_C", deserialize_with = "null_as_nan_vec")]
    pub lst_night: Vec<f32>,
}

/// Parallel per-pixel series for one city: in-zone pixels whose three layers
/// are all finite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityPixels {
    pub ndvi: Vec<f64>,
    pub lst_day: Vec<f64>,
    pub lst_night: Vec<f64>,
}

impl CityPixels {
    pub fn from_grid(grid: &GridPixels) -> Self {
        let mut out = Self::default();
        let rows = grid
            .ward_ids
            .iter()
            .zip(&grid.ndvi)
            .zip(&grid.lst_day)
            .zip(&grid.lst_night);
        for (((&id, &n), &d), &t) in rows {
            if id > 0 && n.is_finite() && d.is_finite() && t.is_finite() {
                out.ndvi.push(n as f64);
                out.lst_day.push(d as f64);
                out.lst_night.push(t as f64);
            }
        }
        out
    }

    /// Read a grid document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let grid: GridPixels = serde_json::from_str(&text).map_err(|source| PipelineError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_grid(&grid))
    }

    pub fn len(&self) -> usize {
        self.ndvi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ndvi.is_empty()
    }

    pub fn median_ndvi(&self) -> Option<f64> {
        if self.ndvi.is_empty() {
            return None;
        }
        let mut sorted = self.ndvi.clone();
        sorted.sort_by(f64::total_cmp);
        Some(percentile_sorted(&sorted, 50.0))
    }
}

// ── Curves ───────────────────────────────────────────────────────────────────

/// Fixed-width edges `min, min + step, …, max` (inclusive). Empty unless
/// `step > 0` and `max > min`.
pub fn bin_edges(min: f64, max: f64, step: f64) -> Vec<f64> {
    if !(step > 0.0 && max > min) || !(max - min).is_finite() {
        return Vec::new();
    }
    let n = ((max - min) / step).round().max(0.0) as usize;
    (0..=n).map(|k| min + k as f64 * step).collect()
}

/// Index of the bin holding `x`: `i` such that `edges[i-1] <= x < edges[i]`,
/// 0 below the first edge, `edges.len()` at or above the last.
fn digitize(x: f64, edges: &[f64]) -> usize {
    edges.partition_point(|&e| e <= x)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseCurve {
    pub ndvi: Vec<f64>,
    pub lst: Vec<f64>,
}

impl ResponseCurve {
    pub fn is_empty(&self) -> bool {
        self.ndvi.is_empty()
    }

    pub fn smoothed(&self, window: usize) -> Self {
        Self { ndvi: self.ndvi.clone(), lst: moving_average(&self.lst, window) }
    }

    /// Piecewise-linear LST at `x`, clamped to the end points outside the
    /// curve domain. `None` for an empty curve.
    pub fn interpolate(&self, x: f64) -> Option<f64> {
        let (xs, ys) = (&self.ndvi, &self.lst);
        let last = xs.len().checked_sub(1)?;
        if x <= xs[0] {
            return Some(ys[0]);
        }
        if x >= xs[last] {
            return Some(ys[last]);
        }
        let j = xs.partition_point(|&v| v < x).saturating_sub(1).min(last.saturating_sub(1));
        let (x0, x1) = (xs[j], xs[j + 1]);
        let t = (x - x0) / (x1 - x0);
        Some(ys[j] + t * (ys[j + 1] - ys[j]))
    }
}

/// Bin `x` on `edges` and average both series per bin. Bins with fewer than
/// `min_count` members are dropped; values outside `[edges[0], edges[last])`
/// fall in no bin.
pub fn build_response_curve(x: &[f64], y: &[f64], edges: &[f64], min_count: usize) -> ResponseCurve {
    if edges.len() < 2 {
        return ResponseCurve::default();
    }
    let nbins = edges.len() - 1;
    let mut sums = vec![(0.0f64, 0.0f64, 0usize); nbins];
    for (&xv, &yv) in x.iter().zip(y) {
        let idx = digitize(xv, edges);
        if (1..=nbins).contains(&idx) {
            let s = &mut sums[idx - 1];
            s.0 += xv;
            s.1 += yv;
            s.2 += 1;
        }
    }

    let mut points: Vec<(f64, f64)> = sums
        .into_iter()
        .filter(|&(_, _, n)| n > 0 && n >= min_count)
        .map(|(sx, sy, n)| (sx / n as f64, sy / n as f64))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    ResponseCurve {
        ndvi: points.iter().map(|p| p.0).collect(),
        lst: points.iter().map(|p| p.1).collect(),
    }
}

/// Centred moving average; the window shrinks at the ends instead of padding.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.len() <= 1 {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

/// Pearson correlation; `None` with fewer than 3 samples or a constant series.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 3 {
        return None;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mx = x.iter().sum::<f64>() / n as f64;
    let my = y.iter().sum::<f64>() / n as f64;
    let num: f64 = x.iter().zip(y).map(|(&a, &b)| (a - mx) * (b - my)).sum();
    let vx = x.iter().map(|&a| (a - mx).powi(2)).sum::<f64>().sqrt();
    let vy = y.iter().map(|&b| (b - my).powi(2)).sum::<f64>().sqrt();
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some((num / (vx * vy)).clamp(-1.0, 1.0))
}

// ── Greening estimate ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GreeningDelta {
    /// Day-curve NDVI nearest the city's median NDVI.
    pub ndvi_ref: f64,
    pub day: f64,
    /// `None` when the night curve is empty.
    pub night: Option<f64>,
}

/// LST change along the smoothed curves for `+step` NDVI, starting at the
/// day-curve point nearest `median_ndvi`. The target is clamped into the day
/// curve's domain.
pub fn greening_delta(day: &ResponseCurve, night: &ResponseCurve, median_ndvi: f64, step: f64) -> Option<GreeningDelta> {
    let first = *day.ndvi.first()?;
    let last = *day.ndvi.last()?;
    let ndvi_ref = day
        .ndvi
        .iter()
        .copied()
        .min_by(|a, b| (a - median_ndvi).abs().total_cmp(&(b - median_ndvi).abs()))?;
    let target = (ndvi_ref + step).min(last).max(first);

    let delta = |curve: &ResponseCurve| Some(curve.interpolate(target)? - curve.interpolate(ndvi_ref)?);
    Some(GreeningDelta { ndvi_ref, day: delta(day)?, night: delta(night) })
}

// ── Document ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayNight<T> {
    pub day: T,
    pub night: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityResponse {
    pub city: String,
    pub n_pixels: usize,
    pub ndvi_corr_day: Option<f64>,
    pub ndvi_corr_night: Option<f64>,
    pub ndvi_to_lst: DayNight<ResponseCurve>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greening_delta: Option<GreeningDelta>,
}

/// Correlations, smoothed curves and the greening estimate for one city.
pub fn city_response(label: &str, pixels: &CityPixels, params: &ResponseParams) -> CityResponse {
    let edges = bin_edges(params.bin_min, params.bin_max, params.bin_step);
    let curve = |lst: &[f64]| {
        build_response_curve(&pixels.ndvi, lst, &edges, params.min_count).smoothed(params.smoothing_window)
    };
    let day = curve(&pixels.lst_day);
    let night = curve(&pixels.lst_night);

    let ndvi_corr_day = pearson(&pixels.ndvi, &pixels.lst_day);
    let ndvi_corr_night = pearson(&pixels.ndvi, &pixels.lst_night);
    if ndvi_corr_day.is_none() || ndvi_corr_night.is_none() {
        warn!("{label}: NDVI–LST correlation undefined ({} pixels)", pixels.len());
    }
    if day.is_empty() {
        warn!("{label}: no NDVI bin reached {} pixels; day curve is empty", params.min_count);
    }

    let greening_delta = pixels
        .median_ndvi()
        .and_then(|median| greening_delta(&day, &night, median, params.greening_step));

    CityResponse {
        city: label.to_string(),
        n_pixels: pixels.len(),
        ndvi_corr_day,
        ndvi_corr_night,
        ndvi_to_lst: DayNight { day, night },
        greening_delta,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseDocument {
    pub per_city_response_curves: BTreeMap<String, CityResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pooled_models: Option<DayNight<PooledModel>>,
    pub note: String,
}

impl ResponseDocument {
    pub fn new(per_city: BTreeMap<String, CityResponse>, pooled: Option<DayNight<PooledModel>>) -> Self {
        Self {
            per_city_response_curves: per_city,
            pooled_models: pooled,
            note: RESPONSE_NOTE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn edges_cover_default_range_inclusive() {
        let e = bin_edges(-0.2, 1.0, 0.05);
        assert_eq!(e.len(), 25);
        assert_relative_eq!(e[0], -0.2);
        assert_relative_eq!(e[24], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_edges_are_empty() {
        assert!(bin_edges(-0.2, 1.0, 0.0).is_empty());
        assert!(bin_edges(-0.2, 1.0, -0.05).is_empty());
        assert!(bin_edges(1.0, -0.2, 0.05).is_empty());
        assert!(build_response_curve(&[0.1], &[30.0], &bin_edges(0.0, 1.0, 0.0), 0).is_empty());
    }

    #[test]
    fn digitize_is_left_closed() {
        let e = [0.0, 1.0, 2.0];
        assert_eq!(digitize(-0.5, &e), 0);
        assert_eq!(digitize(0.0, &e), 1);
        assert_eq!(digitize(0.99, &e), 1);
        assert_eq!(digitize(1.0, &e), 2);
        assert_eq!(digitize(2.0, &e), 3);
    }

    #[test]
    fn sparse_bins_are_dropped_and_points_ascend() {
        let edges = [0.0, 0.1, 0.2, 0.3, 0.4];
        let mut x = Vec::new();
        let mut y = Vec::new();
        // bin 1: 3 members, bin 2: 1 member, bin 4: 2 members, one value past the last edge
        for v in [0.01, 0.02, 0.03] { x.push(v); y.push(30.0); }
        x.push(0.15); y.push(99.0);
        for v in [0.31, 0.33] { x.push(v); y.push(20.0); }
        x.push(0.45); y.push(0.0);

        let curve = build_response_curve(&x, &y, &edges, 2);
        assert_eq!(curve.ndvi.len(), 2);
        assert_relative_eq!(curve.ndvi[0], 0.02, epsilon = 1e-12);
        assert_relative_eq!(curve.ndvi[1], 0.32, epsilon = 1e-12);
        assert_eq!(curve.lst, vec![30.0, 20.0]);
        assert!(curve.ndvi.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn empty_input_gives_empty_curve() {
        let curve = build_response_curve(&[], &[], &bin_edges(-0.2, 1.0, 0.05), 50);
        assert!(curve.is_empty());
        assert!(curve.interpolate(0.3).is_none());
    }

    #[test]
    fn moving_average_shrinks_at_edges() {
        let out = moving_average(&[1.0, 2.0, 6.0, 7.0], 3);
        assert_relative_eq!(out[0], 1.5);
        assert_relative_eq!(out[1], 3.0);
        assert_relative_eq!(out[2], 5.0);
        assert_relative_eq!(out[3], 6.5);
        assert_eq!(moving_average(&[4.0], 3), vec![4.0]);
        assert_eq!(moving_average(&[1.0, 5.0], 1), vec![1.0, 5.0]);
    }

    #[test]
    fn pearson_degenerate_cases() {
        assert!(pearson(&[1.0, 2.0], &[2.0, 4.0]).is_none());
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert_relative_eq!(pearson(&[1.0, 2.0, 3.0], &[6.0, 4.0, 2.0]).unwrap(), -1.0);
    }

    #[test]
    fn interpolation_clamps_outside_domain() {
        let curve = ResponseCurve { ndvi: vec![0.1, 0.3, 0.5], lst: vec![40.0, 30.0, 26.0] };
        assert_eq!(curve.interpolate(0.0), Some(40.0));
        assert_eq!(curve.interpolate(0.9), Some(26.0));
        assert_relative_eq!(curve.interpolate(0.2).unwrap(), 35.0);
        assert_relative_eq!(curve.interpolate(0.4).unwrap(), 28.0);
        assert_relative_eq!(curve.interpolate(0.3).unwrap(), 30.0);
    }

    #[test]
    fn greening_delta_from_median_point() {
        let day = ResponseCurve { ndvi: vec![0.1, 0.3, 0.5], lst: vec![40.0, 30.0, 26.0] };
        let night = ResponseCurve { ndvi: vec![0.1, 0.5], lst: vec![20.0, 16.0] };
        let g = greening_delta(&day, &night, 0.28, 0.1).unwrap();
        assert_relative_eq!(g.ndvi_ref, 0.3);
        assert_relative_eq!(g.day, -2.0, epsilon = 1e-9);
        assert_relative_eq!(g.night.unwrap(), -1.0, epsilon = 1e-9);

        // target past the domain is clamped to the last point
        let g = greening_delta(&day, &ResponseCurve::default(), 0.5, 0.1).unwrap();
        assert_relative_eq!(g.day, 0.0);
        assert!(g.night.is_none());

        assert!(greening_delta(&ResponseCurve::default(), &night, 0.3, 0.1).is_none());
    }

    #[test]
    fn grid_pixels_keep_in_zone_finite_rows() {
        let doc = json!({
            "city": "X",
            "ward_ids": [0, 1, 2, 2],
            "ndvi": [0.5, 0.4, null, 0.2],
            "lst_day_C": [30.0, 31.0, 32.0, 33.0],
            "lst_night_C": [20.0, 21.0, 22.0, 23.0],
        });
        let grid: GridPixels = serde_json::from_value(doc).unwrap();
        let px = CityPixels::from_grid(&grid);
        assert_eq!(px.ndvi.len(), 2);
        assert_relative_eq!(px.ndvi[0], 0.4, epsilon = 1e-6);
        assert_eq!(px.lst_night, vec![21.0, 23.0]);
    }

    #[test]
    fn city_response_bins_linear_relationship() {
        // 100 pixels in each of the ten bins spanning [0, 0.5), clear of the
        // edges; LST falls 10 °C per unit NDVI.
        let ndvi: Vec<f64> = (0..10)
            .flat_map(|k| (0..100).map(move |j| k as f64 * 0.05 + 0.005 + j as f64 * 0.0004))
            .collect();
        let pixels = CityPixels {
            lst_day: ndvi.iter().map(|v| 35.0 - 10.0 * v).collect(),
            lst_night: ndvi.iter().map(|v| 20.0 - 4.0 * v).collect(),
            ndvi,
        };
        let r = city_response("Testville", &pixels, &ResponseParams::default());

        assert_eq!(r.n_pixels, 1000);
        assert_relative_eq!(r.ndvi_corr_day.unwrap(), -1.0, epsilon = 1e-9);
        let day = &r.ndvi_to_lst.day;
        assert_eq!(day.ndvi.len(), 10);
        assert!(day.ndvi.windows(2).all(|w| w[0] < w[1]));
        // interior points of a linear curve are unchanged by smoothing
        assert_relative_eq!(day.lst[4], 35.0 - 10.0 * day.ndvi[4], epsilon = 1e-9);

        let g = r.greening_delta.unwrap();
        assert_relative_eq!(g.day, -1.0, epsilon = 1e-6);
        assert_relative_eq!(g.night.unwrap(), -0.4, epsilon = 1e-6);
    }

    #[test]
    fn document_carries_note_and_city_keys() {
        let mut per_city = BTreeMap::new();
        per_city.insert(
            "paris".to_string(),
            city_response("Paris", &CityPixels::default(), &ResponseParams::default()),
        );
        let v = serde_json::to_value(ResponseDocument::new(per_city, None)).unwrap();
        assert_eq!(v["note"], json!(RESPONSE_NOTE));
        let paris = &v["per_city_response_curves"]["paris"];
        assert_eq!(paris["city"], json!("Paris"));
        assert_eq!(paris["ndvi_corr_day"], serde_json::Value::Null);
        assert_eq!(paris["ndvi_to_lst"]["day"], json!({"ndvi": [], "lst": []}));
        assert!(paris.get("greening_delta").is_none());
        assert!(v.get("pooled_models").is_none());
    }
}

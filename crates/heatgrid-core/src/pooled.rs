//! Pooled linear model across cities:
//!
//! ```text
//! LST = b0 + slope · NDVI + d_city
//! ```
//!
//! Columns are `[1, NDVI, one indicator per city]`. The intercept column is
//! the sum of the indicators, so the system is rank-deficient by one; the
//! minimum-norm least-squares solution is taken and each city's intercept is
//! reported as `b0 + d_city`, which is identifiable.
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::{PipelineError, Result};

/// Which LST band the model regresses on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Day,
    Night,
}

/// One city's contribution to the pooled fit.
#[derive(Debug, Clone, Copy)]
pub struct CitySamples<'a> {
    pub id: &'a str,
    pub ndvi: &'a [f64],
    pub lst: &'a [f64],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityIntercept {
    pub city: String,
    pub intercept: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PooledModel {
    pub target: Target,
    pub ndvi_slope: f64,
    pub global_intercept: f64,
    /// In input order.
    pub city_intercepts: Vec<CityIntercept>,
}

impl PooledModel {
    pub fn intercept_for(&self, city: &str) -> Option<f64> {
        self.city_intercepts.iter().find(|c| c.city == city).map(|c| c.intercept)
    }
}

/// Ordinary least squares over the pooled samples of every city.
///
/// The normal equations are accumulated directly (the design matrix is never
/// materialised) and solved through an SVD pseudo-inverse. Cities with fewer
/// than two samples still enter the fit; their intercepts are unreliable and
/// only reported as a warning.
pub fn fit_pooled_model(cities: &[CitySamples<'_>], target: Target) -> Result<PooledModel> {
    let k = cities.len();
    let dim = 2 + k;
    let mut xtx = DMatrix::<f64>::zeros(dim, dim);
    let mut xty = DVector::<f64>::zeros(dim);
    let mut total = 0usize;

    for (ci, city) in cities.iter().enumerate() {
        let n = city.ndvi.len().min(city.lst.len());
        if n < 2 {
            warn!("{}: only {n} pooled {target:?} observations; intercept is unreliable", city.id);
        }
        let dummy = 2 + ci;
        for (&x, &y) in city.ndvi.iter().zip(city.lst).take(n) {
            // row = [1, x, e_ci]
            xtx[(0, 0)] += 1.0;
            xtx[(0, 1)] += x;
            xtx[(1, 1)] += x * x;
            xtx[(0, dummy)] += 1.0;
            xtx[(1, dummy)] += x;
            xtx[(dummy, dummy)] += 1.0;
            xty[0] += y;
            xty[1] += x * y;
            xty[dummy] += y;
        }
        total += n;
    }
    if total == 0 {
        return Err(PipelineError::Regression("no observations to fit"));
    }
    xtx.fill_lower_triangle_with_upper_triangle();

    let svd = xtx.svd(true, true);
    let max_sv = svd.singular_values.max();
    let eps = max_sv * dim as f64 * f64::EPSILON;
    let beta = svd.solve(&xty, eps).map_err(PipelineError::Regression)?;
    debug!("pooled {target:?}: {total} observations, {k} cities, max singular value {max_sv:.3e}");

    let global_intercept = beta[0];
    let city_intercepts = cities
        .iter()
        .enumerate()
        .map(|(ci, city)| CityIntercept {
            city: city.id.to_string(),
            intercept: global_intercept + beta[2 + ci],
            observations: city.ndvi.len().min(city.lst.len()),
        })
        .collect();

    Ok(PooledModel { target, ndvi_slope: beta[1], global_intercept, city_intercepts })
}

//! Iterative gap filling of NaN pixels inside the zoned region.
//!
//! Each sweep reads only the previous sweep's snapshot, so the result does not
//! depend on the order in which pixels are visited. Pixels outside the mask
//! are never read as neighbours and never written.
use log::debug;

use crate::error::{PipelineError, Result};
use crate::raster::{LayerKind, Raster};

/// Replace missing in-mask pixels by the mean of their in-mask, non-missing
/// orthogonal neighbours, repeated `iterations` times.
pub fn gap_fill(layer: &Raster<f32>, mask: &[bool], iterations: usize) -> Raster<f32> {
    debug_assert_eq!(layer.data.len(), mask.len());
    let (w, h) = (layer.width, layer.height);
    let mut current = layer.clone();
    if w == 0 || h == 0 {
        return current;
    }

    for iter in 0..iterations {
        let prev = &current.data;
        let is_source = |idx: usize| mask[idx] && !prev[idx].is_nan();

        let sweep_row = |(r, out): (usize, &mut [f32])| {
            for (c, cell) in out.iter_mut().enumerate() {
                let idx = r * w + c;
                if !mask[idx] || !prev[idx].is_nan() {
                    continue;
                }
                let mut sum = 0.0f64;
                let mut n = 0u32;
                let mut take = |j: usize| {
                    if is_source(j) {
                        sum += prev[j] as f64;
                        n += 1;
                    }
                };
                if r > 0 { take(idx - w); }
                if r + 1 < h { take(idx + w); }
                if c > 0 { take(idx - 1); }
                if c + 1 < w { take(idx + 1); }
                if n > 0 {
                    *cell = (sum / n as f64) as f32;
                }
            }
        };

        let mut next = current.data.clone();
        #[cfg(feature = "threading")]
        {
            use rayon::prelude::*;
            next.par_chunks_mut(w).enumerate().for_each(sweep_row);
        }
        #[cfg(not(feature = "threading"))]
        next.chunks_mut(w).enumerate().for_each(sweep_row);

        let filled = next.iter().zip(prev).filter(|(a, b)| b.is_nan() && !a.is_nan()).count();
        debug!("gap-fill sweep {}: filled {filled} pixels", iter + 1);
        current.data = next;
        if filled == 0 {
            break;
        }
    }
    current
}

/// Set every in-mask pixel that is still missing to the mean of the finite
/// in-mask values. Fails when there is no finite in-mask value to average.
pub fn fill_remaining(layer: &Raster<f32>, mask: &[bool], kind: LayerKind) -> Result<Raster<f32>> {
    let (sum, n) = layer
        .data
        .iter()
        .zip(mask)
        .filter(|(v, &m)| m && v.is_finite())
        .fold((0.0f64, 0usize), |(s, n), (&v, _)| (s + v as f64, n + 1));
    if n == 0 {
        return Err(PipelineError::EmptyLayer(kind));
    }
    let mean = (sum / n as f64) as f32;

    let mut out = layer.clone();
    let mut fallback = 0usize;
    for (v, _) in out.data.iter_mut().zip(mask).filter(|(v, &m)| m && v.is_nan()) {
        *v = mean;
        fallback += 1;
    }
    if fallback > 0 {
        debug!("{kind}: {fallback} pixels set to global mean {mean:.4}");
    }
    Ok(out)
}

/// Neighbour sweeps followed by the global-mean fallback.
pub fn fill_layer(layer: &Raster<f32>, mask: &[bool], iterations: usize, kind: LayerKind) -> Result<Raster<f32>> {
    fill_remaining(&gap_fill(layer, mask, iterations), mask, kind)
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Geographic extent of a city grid: `[min_lon, min_lat, max_lon, max_lat]`.
/// Serialized as a 4-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.min_lon, b.min_lat, b.max_lon, b.max_lat]
    }
}

/// Pixel geometry shared by every co-registered layer of one city.
///
/// The pixel → (lon, lat) mapping is linear with no rotation. Row index grows
/// with latitude and column index with longitude; pixel centres sit at
/// `min + (index + 0.5) · (max − min) / size` on each axis independently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub bbox: BoundingBox,
}

impl GridSpec {
    pub fn new(width: usize, height: usize, bbox: BoundingBox) -> Self {
        Self { width, height, bbox }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Longitude of a (possibly fractional) column centre.
    #[inline]
    pub fn col_to_lon(&self, col: f64) -> f64 {
        let b = &self.bbox;
        b.min_lon + (col + 0.5) * (b.max_lon - b.min_lon) / self.width as f64
    }

    /// Latitude of a (possibly fractional) row centre.
    #[inline]
    pub fn row_to_lat(&self, row: f64) -> f64 {
        let b = &self.bbox;
        b.min_lat + (row + 0.5) * (b.max_lat - b.min_lat) / self.height as f64
    }

    /// `(lon, lat)` of the centre of pixel `(row, col)`.
    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (self.col_to_lon(col as f64), self.row_to_lat(row as f64))
    }
}

/// A row-major 2D layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
}

impl<T: Clone> Raster<T> {
    /// Create a raster filled with the given value.
    pub fn filled(width: usize, height: usize, fill: T) -> Self {
        Self { data: vec![fill; width * height], width, height }
    }
}

impl<T> Raster<T> {
    /// Wrap row-major data. Returns `None` when the length disagrees with the shape.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Option<Self> {
        (data.len() == width * height).then_some(Self { data, width, height })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        self.data[row * self.width + col] = val;
    }

    /// `(height, width)`, the order used when reporting array shapes.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Raster<U> {
        Raster {
            data: self.data.iter().map(f).collect(),
            width: self.width,
            height: self.height,
        }
    }
}

impl Raster<f32> {
    /// Minimum and maximum over the cells where `mask` is set, ignoring NaN.
    pub fn masked_range(&self, mask: &[bool]) -> Option<(f32, f32)> {
        self.data
            .iter()
            .zip(mask)
            .filter(|(v, &m)| m && v.is_finite())
            .fold(None, |acc, (&v, _)| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// The physical layers a city grid carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Ndvi,
    LstDay,
    LstNight,
    LandCover,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerKind::Ndvi => "NDVI",
            LayerKind::LstDay => "LST day",
            LayerKind::LstNight => "LST night",
            LayerKind::LandCover => "land cover",
        };
        f.write_str(name)
    }
}

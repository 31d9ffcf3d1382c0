//! Raw raster values → physical units.
//!
//! NDVI (MOD13-style): raw `<= -2000` or `== 0` is missing, otherwise scaled by 1e-4.
//! LST (MOD11A2): raw `<= 0` is missing, otherwise scaled by 0.02 K and
//! converted to °C. Missing values become NaN. Land cover is a MODIS IGBP
//! class code, validated against the 18-entry table.
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::raster::{LayerKind, Raster};

pub const NDVI_SCALE: f32 = 0.0001;
pub const NDVI_NODATA_MAX: f32 = -2000.0;
pub const LST_SCALE: f32 = 0.02;
pub const KELVIN_OFFSET: f32 = 273.15;

/// A decoded array as delivered by the raster reader: shape plus row-major
/// (C-order) data.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArray<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T: Copy> RawArray<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Self {
        Self { shape, data }
    }

    fn check_len(&self, layer: LayerKind) -> Result<()> {
        if self.shape.iter().product::<usize>() != self.data.len() {
            return Err(PipelineError::ShapeMismatch {
                layer,
                expected: self.shape.clone(),
                found: vec![self.data.len()],
            });
        }
        Ok(())
    }

    /// Accept `(H, W)` or `(1, H, W)`.
    pub fn single_band(self, layer: LayerKind) -> Result<Raster<T>> {
        self.check_len(layer)?;
        let (h, w) = match self.shape.as_slice() {
            &[h, w] | &[1, h, w] => (h, w),
            _ => {
                return Err(PipelineError::ShapeMismatch {
                    layer,
                    expected: vec![0, 0],
                    found: self.shape.clone(),
                })
            }
        };
        Ok(Raster { data: self.data, width: w, height: h })
    }

    /// Split a two-band stack aligned to `(height, width)`. Band-last
    /// `(H, W, 2)` is checked before band-first `(2, H, W)`.
    pub fn split_day_night(self, height: usize, width: usize) -> Result<(Raster<T>, Raster<T>)> {
        self.check_len(LayerKind::LstDay)?;
        let n = height * width;
        if self.shape == [height, width, 2] {
            let day = self.data.iter().step_by(2).copied().collect();
            let night = self.data.iter().skip(1).step_by(2).copied().collect();
            return Ok((
                Raster { data: day, width, height },
                Raster { data: night, width, height },
            ));
        }
        if self.shape == [2, height, width] {
            let mut day = self.data;
            let night = day.split_off(n);
            return Ok((
                Raster { data: day, width, height },
                Raster { data: night, width, height },
            ));
        }
        Err(PipelineError::ShapeMismatch {
            layer: LayerKind::LstDay,
            expected: vec![height, width, 2],
            found: self.shape,
        })
    }
}

pub fn ndvi_value(raw: f32) -> f32 {
    if raw <= NDVI_NODATA_MAX || raw == 0.0 {
        f32::NAN
    } else {
        raw * NDVI_SCALE
    }
}

pub fn lst_celsius(raw: f32) -> f32 {
    if raw <= 0.0 {
        f32::NAN
    } else {
        raw * LST_SCALE - KELVIN_OFFSET
    }
}

/// MODIS IGBP land-cover classes, serialized by display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LandCoverClass {
    #[serde(rename = "No Data")]
    NoData,
    #[serde(rename = "Evergreen Needleleaf Forests")]
    EvergreenNeedleleafForests,
    #[serde(rename = "Evergreen Broadleaf Forests")]
    EvergreenBroadleafForests,
    #[serde(rename = "Deciduous Needleleaf Forests")]
    DeciduousNeedleleafForests,
    #[serde(rename = "Deciduous Broadleaf Forests")]
    DeciduousBroadleafForests,
    #[serde(rename = "Mixed Forests")]
    MixedForests,
    #[serde(rename = "Closed Shrublands")]
    ClosedShrublands,
    #[serde(rename = "Open Shrublands")]
    OpenShrublands,
    #[serde(rename = "Woody Savannas")]
    WoodySavannas,
    #[serde(rename = "Savannas")]
    Savannas,
    #[serde(rename = "Grasslands")]
    Grasslands,
    #[serde(rename = "Permanent Wetlands")]
    PermanentWetlands,
    #[serde(rename = "Croplands")]
    Croplands,
    #[serde(rename = "Urban and Built-up Lands")]
    UrbanAndBuiltUp,
    #[serde(rename = "Cropland/Natural Vegetation Mosaics")]
    CroplandNaturalMosaics,
    #[serde(rename = "Permanent Snow and Ice")]
    PermanentSnowAndIce,
    #[serde(rename = "Barren")]
    Barren,
    #[serde(rename = "Water Bodies")]
    WaterBodies,
}

impl LandCoverClass {
    /// Table order: index == class code.
    pub const ALL: [LandCoverClass; 18] = [
        LandCoverClass::NoData,
        LandCoverClass::EvergreenNeedleleafForests,
        LandCoverClass::EvergreenBroadleafForests,
        LandCoverClass::DeciduousNeedleleafForests,
        LandCoverClass::DeciduousBroadleafForests,
        LandCoverClass::MixedForests,
        LandCoverClass::ClosedShrublands,
        LandCoverClass::OpenShrublands,
        LandCoverClass::WoodySavannas,
        LandCoverClass::Savannas,
        LandCoverClass::Grasslands,
        LandCoverClass::PermanentWetlands,
        LandCoverClass::Croplands,
        LandCoverClass::UrbanAndBuiltUp,
        LandCoverClass::CroplandNaturalMosaics,
        LandCoverClass::PermanentSnowAndIce,
        LandCoverClass::Barren,
        LandCoverClass::WaterBodies,
    ];

    pub fn from_code(code: i32) -> Result<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(PipelineError::UnknownLandCoverCode(code))
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// All four layers of one city in physical units, sharing one shape.
#[derive(Debug, Clone)]
pub struct PhysicalLayers {
    pub ndvi: Raster<f32>,
    pub lst_day: Raster<f32>,
    pub lst_night: Raster<f32>,
    pub land_cover: Raster<LandCoverClass>,
}

impl PhysicalLayers {
    /// Validate shapes against the NDVI layer and convert every layer.
    pub fn from_raw(ndvi: RawArray<f32>, lst: RawArray<f32>, land_cover: RawArray<i32>) -> Result<Self> {
        let ndvi = ndvi.single_band(LayerKind::Ndvi)?;
        let (h, w) = ndvi.shape();
        let (day, night) = lst.split_day_night(h, w)?;

        let lc = land_cover.single_band(LayerKind::LandCover)?;
        if lc.shape() != (h, w) {
            return Err(PipelineError::ShapeMismatch {
                layer: LayerKind::LandCover,
                expected: vec![h, w],
                found: vec![lc.height, lc.width],
            });
        }
        let classes = lc
            .data
            .iter()
            .map(|&code| LandCoverClass::from_code(code))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ndvi: ndvi.map(|&v| ndvi_value(v)),
            lst_day: day.map(|&v| lst_celsius(v)),
            lst_night: night.map(|&v| lst_celsius(v)),
            land_cover: Raster { data: classes, width: w, height: h },
        })
    }
}

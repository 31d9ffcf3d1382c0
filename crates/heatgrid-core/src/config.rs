//! Study configuration: which cities to process, where their inputs live and
//! the tunable parameters of each stage. Loaded once by the tools and passed
//! explicitly into the pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::raster::BoundingBox;

pub const DEFAULT_CRS: &str = "EPSG:102400";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    pub cities: Vec<CityConfig>,
    #[serde(default)]
    pub pipeline: PipelineParams,
    #[serde(default)]
    pub response: ResponseParams,
    /// Destination of the response-curve document.
    pub models_out: PathBuf,
}

impl StudyConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let study: Self = serde_json::from_str(&text).map_err(|source| PipelineError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        study.response.validate()?;
        Ok(study)
    }

    pub fn city(&self, id: &str) -> Option<&CityConfig> {
        self.cities.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityConfig {
    /// Short key, e.g. `"london"`.
    pub id: String,
    /// Display name written into the documents, e.g. `"London"`.
    pub label: String,
    pub bbox: BoundingBox,
    pub boundaries: BoundarySource,
    pub rasters: RasterPaths,
    pub outputs: OutputPaths,
    #[serde(default = "default_crs")]
    pub crs: String,
}

fn default_crs() -> String {
    DEFAULT_CRS.to_string()
}

/// Where the zone polygons come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum BoundarySource {
    /// A directory of single-feature boundary files.
    Directory(PathBuf),
    /// One multi-feature boundary file.
    Collection(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterPaths {
    pub ndvi: PathBuf,
    /// Two-band (day, night) land-surface temperature.
    pub lst: PathBuf,
    pub land_cover: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputPaths {
    pub grid: PathBuf,
    pub zones: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Neighbour-mean sweeps before the global-mean fallback.
    pub gap_fill_iterations: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self { gap_fill_iterations: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseParams {
    pub bin_min: f64,
    pub bin_max: f64,
    pub bin_step: f64,
    /// Bins with fewer member pixels are dropped.
    pub min_count: usize,
    pub smoothing_window: usize,
    /// NDVI increment used for the greening estimate.
    pub greening_step: f64,
}

impl Default for ResponseParams {
    fn default() -> Self {
        Self {
            bin_min: -0.2,
            bin_max: 1.0,
            bin_step: 0.05,
            min_count: 50,
            smoothing_window: 3,
            greening_step: 0.1,
        }
    }
}

impl ResponseParams {
    /// Reject bin layouts that cannot produce edges and non-finite steps.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));
        if !(self.bin_step.is_finite() && self.bin_step > 0.0) {
            return invalid(format!("response.bin_step must be a positive number, got {}", self.bin_step));
        }
        if !(self.bin_min.is_finite() && self.bin_max.is_finite() && self.bin_max > self.bin_min) {
            return invalid(format!(
                "response.bin_max ({}) must exceed response.bin_min ({})",
                self.bin_max, self.bin_min
            ));
        }
        if !(self.greening_step.is_finite() && self.greening_step > 0.0) {
            return invalid(format!("response.greening_step must be a positive number, got {}", self.greening_step));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUDY: &str = r#"{
        "cities": [{
            "id": "london",
            "label": "London",
            "bbox": [-0.5, 51.3, 0.3, 51.7],
            "boundaries": {"kind": "collection", "path": "data/london/boundaries/london32.json"},
            "rasters": {
                "ndvi": "data/london/ndvi.tif",
                "lst": "data/london/lst.tif",
                "land_cover": "data/london/lc.tif"
            },
            "outputs": {"grid": "out/london_grid.json", "zones": "out/london_boroughs.json"}
        }],
        "response": {"min_count": 20},
        "models_out": "out/models/ndvi_lst_response_curves.json"
    }"#;

    #[test]
    fn parses_study_with_defaults() {
        let study: StudyConfig = serde_json::from_str(STUDY).unwrap();
        let london = study.city("london").unwrap();
        assert_eq!(london.crs, DEFAULT_CRS);
        assert_eq!(london.bbox, BoundingBox::new(-0.5, 51.3, 0.3, 51.7));
        assert_eq!(
            london.boundaries,
            BoundarySource::Collection(PathBuf::from("data/london/boundaries/london32.json"))
        );
        assert_eq!(study.pipeline.gap_fill_iterations, 8);
        assert_eq!(study.response.min_count, 20);
        assert_eq!(study.response.smoothing_window, 3);
        assert!(study.city("tokyo").is_none());
    }

    #[test]
    fn default_response_params_are_valid() {
        assert!(ResponseParams::default().validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_bins() {
        for params in [
            ResponseParams { bin_step: 0.0, ..Default::default() },
            ResponseParams { bin_step: -0.05, ..Default::default() },
            ResponseParams { bin_step: f64::NAN, ..Default::default() },
            ResponseParams { bin_min: 1.0, bin_max: -0.2, ..Default::default() },
            ResponseParams { greening_step: 0.0, ..Default::default() },
        ] {
            assert!(matches!(params.validate(), Err(PipelineError::InvalidConfig(_))), "{params:?}");
        }
    }

    #[test]
    fn from_path_validates_response_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.json");
        let text = STUDY.replace(r#""min_count": 20"#, r#""min_count": 20, "bin_step": 0.0"#);
        fs::write(&path, text).unwrap();
        let err = StudyConfig::from_path(&path).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)), "{err}");

        fs::write(&path, STUDY).unwrap();
        assert_eq!(StudyConfig::from_path(&path).unwrap().response.min_count, 20);
    }

    #[test]
    fn directory_source_round_trips() {
        let src = BoundarySource::Directory(PathBuf::from("data/tokyo_wards"));
        let json = serde_json::to_string(&src).unwrap();
        assert_eq!(json, r#"{"kind":"directory","path":"data/tokyo_wards"}"#);
    }
}

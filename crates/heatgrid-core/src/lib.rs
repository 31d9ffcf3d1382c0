//! Urban heat grid preprocessing: administrative zones, satellite NDVI / LST /
//! land-cover rasters, per-zone statistics and NDVI→LST response models.
pub mod boundaries;
pub mod config;
pub mod error;
pub mod gapfill;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod pooled;
pub mod raster;
pub mod rasterize;
pub mod response;
pub mod zonal;

pub use config::{CityConfig, StudyConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{preprocess_city, CityOutput, RawLayers};

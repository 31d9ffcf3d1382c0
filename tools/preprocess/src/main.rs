/// Per-city preprocessing: decodes the NDVI, LST and land-cover GeoTIFFs of
/// every configured city, assigns pixels to administrative zones, gap-fills
/// and summarises, then writes the grid and zones documents.
///
/// A city that fails is logged and skipped; the remaining cities still run.
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tempfile::NamedTempFile;
use tiff::decoder::{Decoder, DecodingResult};

use heatgrid_core::boundaries::load_zones;
use heatgrid_core::config::{CityConfig, PipelineParams, StudyConfig};
use heatgrid_core::normalize::RawArray;
use heatgrid_core::{preprocess_city, RawLayers};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "preprocess",
    about = "Rasterize zones, gap-fill satellite layers and write per-city grid / zone documents"
)]
struct Args {
    /// Study configuration (cities, inputs, outputs, parameters)
    #[arg(short, long, default_value = "data/study.json")]
    config: PathBuf,

    /// Process only this city id (omit to process every configured city)
    #[arg(long)]
    city: Option<String>,
}

// ── Raster decoding ──────────────────────────────────────────────────────────

fn decoded_to_f32(img: DecodingResult) -> Vec<f32> {
    match img {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
    }
}

/// Array shape for `pages` decoded images of `height × width` with `len`
/// samples each: `(H, W)`, band-last `(H, W, S)` for interleaved samples, or
/// band-first `(P, H, W)` for one band per page.
fn array_shape(pages: usize, height: usize, width: usize, len: usize) -> Result<Vec<usize>> {
    let px = height * width;
    if px == 0 || len % px != 0 {
        bail!("{len} samples do not tile a {width}×{height} image");
    }
    let samples = len / px;
    match (pages, samples) {
        (1, 1) => Ok(vec![height, width]),
        (1, s) => Ok(vec![height, width, s]),
        (p, 1) => Ok(vec![p, height, width]),
        (p, s) => bail!("{p} pages with {s} samples per pixel is not a supported layout"),
    }
}

/// Decode every page of a GeoTIFF into one row-major array.
fn read_raster(path: &Path) -> Result<RawArray<f32>> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("Not a valid TIFF: {}", path.display()))?;

    let (width, height) = decoder.dimensions()?;
    let mut data = Vec::new();
    let mut pages = 0usize;
    loop {
        if decoder.dimensions()? != (width, height) {
            bail!("{}: page {} has different dimensions", path.display(), pages + 1);
        }
        let img = decoder
            .read_image()
            .with_context(|| format!("read_image failed: {}", path.display()))?;
        let page = decoded_to_f32(img);
        if pages > 0 && page.len() != width as usize * height as usize {
            bail!("{}: multi-page rasters must be single-band", path.display());
        }
        data.extend(page);
        pages += 1;
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let shape = array_shape(pages, height as usize, width as usize, data.len())
        .with_context(|| format!("Unexpected layout in {}", path.display()))?;
    info!("  {} → {:?}", path.display(), shape);
    Ok(RawArray::new(shape, data))
}

/// Land-cover samples must be whole, finite class codes.
fn class_codes(data: Vec<f32>) -> Result<Vec<i32>> {
    data.into_iter()
        .enumerate()
        .map(|(i, v)| {
            if !v.is_finite() || v.fract() != 0.0 {
                bail!("sample {i} is {v}, not an integer class code");
            }
            Ok(v as i32)
        })
        .collect()
}

fn read_codes(path: &Path) -> Result<RawArray<i32>> {
    let raw = read_raster(path)?;
    let codes = class_codes(raw.data).with_context(|| format!("Bad land-cover raster {}", path.display()))?;
    Ok(RawArray::new(raw.shape, codes))
}

// ── Per-city run ─────────────────────────────────────────────────────────────

/// Write `text` to a temporary file next to `path`, ready to be persisted.
fn stage_json(path: &Path, text: &str) -> Result<NamedTempFile> {
    if path.is_dir() {
        bail!("{} is a directory", path.display());
    }
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).with_context(|| format!("Cannot create {}", parent.display()))?;
            parent
        }
        None => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Cannot stage {}", path.display()))?;
    tmp.write_all(text.as_bytes())
        .with_context(|| format!("Write failed: {}", path.display()))?;
    Ok(tmp)
}

/// Write every document or none: all are staged first, then renamed into
/// place. If a rename fails, documents already moved are removed again.
fn write_outputs(docs: &[(&Path, String)]) -> Result<()> {
    let staged = docs
        .iter()
        .map(|(path, text)| stage_json(path, text))
        .collect::<Result<Vec<_>>>()?;

    let mut written: Vec<&Path> = Vec::new();
    for (&(path, _), tmp) in docs.iter().zip(staged) {
        if let Err(e) = tmp.persist(path) {
            for done in &written {
                if let Err(rm) = fs::remove_file(done) {
                    warn!("Cannot remove partial output {}: {rm}", done.display());
                }
            }
            return Err(e.error).with_context(|| format!("Write failed: {}", path.display()));
        }
        written.push(path);
    }
    Ok(())
}

fn run_city(city: &CityConfig, params: &PipelineParams) -> Result<()> {
    let zones = load_zones(&city.boundaries)?;
    if zones.is_empty() {
        warn!("{}: no zones loaded; every pixel will be outside", city.id);
    }

    let raw = RawLayers {
        ndvi: read_raster(&city.rasters.ndvi)?,
        lst: read_raster(&city.rasters.lst)?,
        land_cover: read_codes(&city.rasters.land_cover)?,
    };
    let out = preprocess_city(city, &zones, raw, params)?;

    let grid = serde_json::to_string(&out.grid)?;
    let zones_doc = serde_json::to_string_pretty(&out.zones)?;
    write_outputs(&[(city.outputs.grid.as_path(), grid), (city.outputs.zones.as_path(), zones_doc)])?;

    info!(
        "{}: {} zones → {}, grid → {}",
        city.label,
        out.zones.num_wards,
        city.outputs.zones.display(),
        city.outputs.grid.display()
    );
    Ok(())
}

// ── main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let study = StudyConfig::from_path(&args.config)
        .with_context(|| format!("Cannot load {}", args.config.display()))?;

    let cities: Vec<&CityConfig> = study
        .cities
        .iter()
        .filter(|c| args.city.as_deref().map_or(true, |id| c.id == id))
        .collect();
    if cities.is_empty() {
        bail!("no city matches {:?} in {}", args.city, args.config.display());
    }

    let mut failed = Vec::new();
    for city in &cities {
        info!("[preprocess] City: {} ({})", city.label, city.id);
        if let Err(e) = run_city(city, &study.pipeline) {
            error!("{}: {e:#}", city.id);
            failed.push(city.id.as_str());
        }
    }

    if !failed.is_empty() {
        bail!("{} of {} cities failed: {}", failed.len(), cities.len(), failed.join(", "));
    }
    info!("[preprocess] Done. {} cities processed.", cities.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_band_image() {
        assert_eq!(array_shape(1, 3, 4, 12).unwrap(), vec![3, 4]);
    }

    #[test]
    fn interleaved_bands_are_band_last() {
        assert_eq!(array_shape(1, 3, 4, 24).unwrap(), vec![3, 4, 2]);
    }

    #[test]
    fn pages_are_band_first() {
        assert_eq!(array_shape(2, 3, 4, 24).unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn ragged_buffer_is_rejected() {
        assert!(array_shape(1, 3, 4, 13).is_err());
        assert!(array_shape(1, 0, 4, 0).is_err());
    }

    #[test]
    fn decoded_integers_widen_to_f32() {
        assert_eq!(decoded_to_f32(DecodingResult::I16(vec![-3000, 0, 9000])), vec![-3000.0, 0.0, 9000.0]);
        assert_eq!(decoded_to_f32(DecodingResult::U8(vec![13, 17])), vec![13.0, 17.0]);
    }

    #[test]
    fn class_codes_must_be_integral() {
        assert_eq!(class_codes(vec![13.0, 17.0, 0.0]).unwrap(), vec![13, 17, 0]);
        assert!(class_codes(vec![13.0, f32::NAN]).is_err());
        assert!(class_codes(vec![1.5]).is_err());
        assert!(class_codes(vec![f32::INFINITY]).is_err());
    }

    #[test]
    fn write_outputs_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let grid = dir.path().join("nested").join("grid.json");
        let zones = dir.path().join("zones.json");
        write_outputs(&[(grid.as_path(), "{}".to_string()), (zones.as_path(), "[]".to_string())]).unwrap();
        assert_eq!(fs::read_to_string(&grid).unwrap(), "{}");
        assert_eq!(fs::read_to_string(&zones).unwrap(), "[]");
    }

    #[test]
    fn failed_output_leaves_no_partial_documents() {
        let dir = tempfile::tempdir().unwrap();
        let grid = dir.path().join("grid.json");
        let zones = dir.path().join("zones.json");
        fs::create_dir(&zones).unwrap();

        assert!(write_outputs(&[(grid.as_path(), "{}".to_string()), (zones.as_path(), "[]".to_string())]).is_err());
        assert!(!grid.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "only the pre-existing directory should remain");
    }
}

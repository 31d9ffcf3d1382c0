//! NDVI → LST response models across cities.
//! Reads the grid document of every configured city, builds smoothed
//! per-city response curves, correlations and greening estimates, fits the
//! pooled day / night models and writes one response-curve document.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::{collections::BTreeMap, fs, path::PathBuf};

use heatgrid_core::config::StudyConfig;
use heatgrid_core::pooled::{fit_pooled_model, CitySamples, PooledModel, Target};
use heatgrid_core::response::{city_response, CityPixels, DayNight, ResponseDocument};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "response_curves", about = "Build per-city NDVI→LST response curves and pooled models")]
struct Args {
    /// Study configuration (the same file the preprocess tool reads).
    #[arg(short, long, default_value = "data/study.json")]
    config: PathBuf,

    /// Output path; defaults to `models_out` from the configuration.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Include only this city id.
    #[arg(long)]
    city: Option<String>,
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |r| format!("{r:.3}"))
}

fn pooled(loaded: &[(String, CityPixels)], target: Target) -> Result<PooledModel> {
    let samples: Vec<CitySamples<'_>> = loaded
        .iter()
        .map(|(id, px)| CitySamples {
            id: id.as_str(),
            ndvi: &px.ndvi,
            lst: match target {
                Target::Day => &px.lst_day,
                Target::Night => &px.lst_night,
            },
        })
        .collect();
    let model = fit_pooled_model(&samples, target)?;
    info!("{target:?} model: global NDVI slope {:.3} °C per NDVI", model.ndvi_slope);
    for c in &model.city_intercepts {
        info!("  {:<12} intercept {:>8.3} °C  ({} px)", c.city, c.intercept, c.observations);
    }
    Ok(model)
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let study = StudyConfig::from_path(&args.config)
        .with_context(|| format!("Cannot load {}", args.config.display()))?;

    // Configured order is kept for the pooled model's indicator columns.
    let mut loaded: Vec<(String, CityPixels)> = Vec::new();
    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    for city in &study.cities {
        if args.city.as_deref().is_some_and(|id| id != city.id) {
            continue;
        }
        let path = &city.outputs.grid;
        if !path.exists() {
            warn!("Grid file not found for {}: {}; skipping", city.id, path.display());
            continue;
        }
        let pixels = CityPixels::load(path)?;
        info!("Loaded {} ({}): {} pixels inside zones", city.id, city.label, pixels.len());
        labels.insert(city.id.clone(), city.label.clone());
        loaded.push((city.id.clone(), pixels));
    }

    let mut per_city = BTreeMap::new();
    for (id, pixels) in &loaded {
        let label = labels.get(id).map(String::as_str).unwrap_or(id.as_str());
        let r = city_response(label, pixels, &study.response);
        info!(
            "{label}: corr(NDVI, LST day) {}  corr(NDVI, LST night) {}  curve points {}/{}",
            fmt_opt(r.ndvi_corr_day),
            fmt_opt(r.ndvi_corr_night),
            r.ndvi_to_lst.day.ndvi.len(),
            r.ndvi_to_lst.night.ndvi.len(),
        );
        if let Some(g) = &r.greening_delta {
            info!(
                "  Δ for +{:.2} NDVI at NDVI≈{:.2}: day {:+.2} °C, night {}",
                study.response.greening_step,
                g.ndvi_ref,
                g.day,
                g.night.map_or_else(|| "n/a".to_string(), |n| format!("{n:+.2} °C")),
            );
        }
        per_city.insert(id.clone(), r);
    }

    let pooled_models = if loaded.is_empty() {
        warn!("No grid documents loaded; pooled models skipped");
        None
    } else {
        Some(DayNight { day: pooled(&loaded, Target::Day)?, night: pooled(&loaded, Target::Night)? })
    };

    let doc = ResponseDocument::new(per_city, pooled_models);
    let out_path = args.output.unwrap_or(study.models_out);
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    fs::write(&out_path, serde_json::to_string_pretty(&doc)?)
        .with_context(|| format!("Write failed: {}", out_path.display()))?;

    info!("Done. {} cities → {}", doc.per_city_response_curves.len(), out_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixels(offset: f64) -> CityPixels {
        let ndvi: Vec<f64> = (0..30).map(|i| 0.1 + i as f64 * 0.02).collect();
        CityPixels {
            lst_day: ndvi.iter().map(|x| offset - 6.0 * x).collect(),
            lst_night: ndvi.iter().map(|x| offset / 2.0 - 2.0 * x).collect(),
            ndvi,
        }
    }

    #[test]
    fn pooled_uses_requested_band() {
        let loaded = vec![("a".to_string(), pixels(30.0)), ("b".to_string(), pixels(36.0))];
        let day = pooled(&loaded, Target::Day).unwrap();
        let night = pooled(&loaded, Target::Night).unwrap();
        assert!((day.ndvi_slope + 6.0).abs() < 1e-8);
        assert!((night.ndvi_slope + 2.0).abs() < 1e-8);
        assert_eq!(day.city_intercepts[1].city, "b");
        assert!((night.intercept_for("b").unwrap() - 18.0).abs() < 1e-8);
    }

    #[test]
    fn fmt_opt_handles_missing() {
        assert_eq!(fmt_opt(None), "n/a");
        assert_eq!(fmt_opt(Some(-0.5)), "-0.500");
    }
}

//! `patchvol config`: Configuration management commands.

use patchvol_config::AppConfig;
use std::path::Path;

pub async fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load_at(path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            let sim = &config.simulation;
            if sim
                .volume_shape
                .iter()
                .zip(&sim.patch_shape)
                .any(|(v, p)| p > v)
            {
                warnings.push("simulation.patch_shape is larger than the volume on some axis");
            }

            if config.pipeline.channel_capacity < sim.batch_size {
                warnings.push("pipeline.channel_capacity is smaller than simulation.batch_size");
            }

            if !config.pipeline.flush_on_close {
                warnings.push(
                    "pipeline.flush_on_close = false: the last subject of a stream is never emitted",
                );
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Readiness: {:?}", config.assembler.readiness);
            println!("   Bounds:    {:?}", config.assembler.bounds);
            println!("   Layout:    {:?}", config.assembler.layout);
            println!("   Revisit:   {:?}", config.assembler.revisit);
            println!("   On error:  {:?}", config.pipeline.on_batch_error);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show(config: &AppConfig, defaults: bool) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = if defaults {
        AppConfig::default_toml()
    } else {
        config.to_toml()?
    };
    println!("{toml_str}");
    Ok(())
}

pub async fn path(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);
    println!("{}", config_path.display());
    Ok(())
}

//! `patchvol status`: Show the effective configuration.

use patchvol_config::AppConfig;
use std::path::Path;

pub async fn run(config: &AppConfig, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);
    let sim = &config.simulation;

    println!("🧩 patchvol Status");
    println!("==================");
    println!("  Config file:  {}", config_path.display());
    println!("  Readiness:    {:?}", config.assembler.readiness);
    println!("  Bounds:       {:?}", config.assembler.bounds);
    println!("  Layout:       {:?}", config.assembler.layout);
    println!("  Revisit:      {:?}", config.assembler.revisit);
    println!("  Channel:      {} batches", config.pipeline.channel_capacity);
    println!("  Flush:        {}", if config.pipeline.flush_on_close { "on close" } else { "disabled" });
    println!("  On error:     {:?}", config.pipeline.on_batch_error);
    println!("  Simulation:   {} subjects of {:?}, patches {:?}, batch {}", sim.subjects, sim.volume_shape, sim.patch_shape, sim.batch_size);
    println!("  Logging:      {}{}", config.logging.level, if config.logging.json { " (json)" } else { "" });

    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, using defaults (see `patchvol config show --defaults`)");
    }

    Ok(())
}

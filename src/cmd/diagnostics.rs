//! Diagnostics command: Docker connectivity plus a summary of the pools
//! that would be loaded from the given configuration file.

use anyhow::Result;

use crate::config::PoolSetConfig;
use crate::runtime::docker::DockerRuntime;

pub async fn run(config_path: &str) -> Result<()> {
    println!("Pool Engine Diagnostics");
    println!("generated at {}", chrono::Local::now().to_rfc3339());
    println!("=======================\n");

    println!("Docker:");
    println!("-------");
    match DockerRuntime::connect() {
        Ok(runtime) => match runtime.ping().await {
            Ok(()) => println!("  Connected: yes"),
            Err(e) => println!("  Connected: no ({e})"),
        },
        Err(e) => println!("  Connect failed: {e}"),
    }

    println!("\nConfiguration ({config_path}):");
    println!("-------------------------------");
    match PoolSetConfig::load(config_path) {
        Ok(config) => {
            for (name, pool) in &config.pools {
                println!("  {name}: image={} size={} port={}", pool.image, pool.size, pool.port);
            }
        }
        Err(e) => println!("  Failed to load: {e}"),
    }

    println!("\nDiagnostics complete.");
    Ok(())
}

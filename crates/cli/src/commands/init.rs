//! `kateno init`: write a default config file.

use kateno_config::AppConfig;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() && !force {
        println!("  Config already exists: {}", config_path.display());
        println!("  Re-run with --force to overwrite it.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created {}", config_path.display());

    println!();
    println!("Next steps:");
    println!("  1. Export a provider key, e.g. GROQ_API_KEY=gsk_...");
    println!("     Without one, replies come from the offline simulator.");
    println!("  2. Optionally export TAVILY_API_KEY to enable web search.");
    println!("  3. Run `kateno serve` or `kateno chat -m \"hello\"`.");

    Ok(())
}

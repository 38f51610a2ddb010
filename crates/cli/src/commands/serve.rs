//! `kateno serve`: start the HTTP gateway.

use kateno_config::AppConfig;
use kateno_providers::ProviderRegistry;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let active = ProviderRegistry::from_config(&config).active();
    println!("Kateno Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", active.name(), active.model());
    println!(
        "   Search:    {}",
        if config.search.api_key().is_some() { "enabled" } else { "disabled" }
    );

    kateno_gateway::start(config).await?;

    Ok(())
}

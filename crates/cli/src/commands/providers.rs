//! `kateno providers`: list configured providers.

use kateno_config::AppConfig;
use kateno_providers::ProviderRegistry;

pub async fn run(json: bool, check: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = ProviderRegistry::from_config(&config);
    let active = registry.active();
    let providers = registry.descriptors();

    let mut reachable = Vec::with_capacity(providers.len());
    for descriptor in &providers {
        let health = match registry.get(&descriptor.name) {
            Some(provider) if check && descriptor.available => {
                Some(provider.health_check().await.unwrap_or(false))
            }
            _ => None,
        };
        reachable.push(health);
    }

    if json {
        let entries: Vec<serde_json::Value> = providers
            .iter()
            .zip(&reachable)
            .map(|(descriptor, health)| {
                let mut entry = serde_json::json!(descriptor);
                if let Some(ok) = health {
                    entry["reachable"] = serde_json::Value::Bool(*ok);
                }
                entry
            })
            .collect();
        let body = serde_json::json!({
            "active": active.name(),
            "providers": entries,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("Providers (fallback order)");
    println!("==========================");
    for (provider, health) in providers.iter().zip(&reachable) {
        let marker = if provider.name == active.name() { "*" } else { " " };
        let status = match (provider.available, health) {
            (false, _) => "no key",
            (true, Some(false)) => "unreachable",
            _ => "ready",
        };
        println!("  {marker} {:<12} {:<12} {}", provider.name, status, provider.model);
    }
    println!();
    println!("  * active provider");

    Ok(())
}

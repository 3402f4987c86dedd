pub mod schema;
pub mod watcher;

use crate::error::{LightError, Result};
use schema::AppConfig;
use std::path::Path;

/// Load and parse configuration from a TOML file.
///
/// # Errors
/// Returns `LightError::ConfigNotFound` if the file doesn't exist,
/// `LightError::Io` on read errors, `LightError::TomlParse` on syntax errors,
/// or `LightError::Config` on validation failures.
pub fn load(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(LightError::ConfigNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let content = expand_env_vars(&content);
    let config: AppConfig = toml::from_str(&content)?;

    validate(&config)?;
    Ok(config)
}

/// Expand `${VAR}` and `$VAR` patterns in the config string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                } else {
                    // Keep original if env var not found
                    use std::fmt::Write;
                    let _ = write!(result, "${{{var_name}}}");
                }
            } else {
                let var_name: String = chars
                    .by_ref()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if var_name.is_empty() {
                    result.push('$');
                } else if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                } else {
                    result.push('$');
                    result.push_str(&var_name);
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Validate config constraints.
fn validate(config: &AppConfig) -> Result<()> {
    if config.user.username.trim().is_empty() {
        return Err(LightError::Config("user.username must not be empty".to_string()));
    }

    if config.bus.host.trim().is_empty() {
        return Err(LightError::Config("bus.host must not be empty".to_string()));
    }

    if config.bus.initial_backoff_secs == 0
        || config.bus.initial_backoff_secs > config.bus.max_backoff_secs
    {
        return Err(LightError::Config(
            "bus.initial_backoff_secs must be 1..=max_backoff_secs".to_string(),
        ));
    }

    if config.bus.poll_timeout_ms == 0 || config.bus.health_check_secs == 0 {
        return Err(LightError::Config(
            "bus.poll_timeout_ms and bus.health_check_secs must be non-zero".to_string(),
        ));
    }

    let light = &config.light;
    if light.volume > 7 {
        return Err(LightError::Config("light.volume must be 0-7".to_string()));
    }

    if !(10..=100).contains(&light.brightness) {
        return Err(LightError::Config("light.brightness must be 10-100".to_string()));
    }

    if light.flash.count == 0 {
        return Err(LightError::Config("light.flash.count must be at least 1".to_string()));
    }

    if light.flash.secondary().is_none() {
        return Err(LightError::Config(format!(
            "light.flash.color '{}' is not a #rrggbb colour",
            light.flash.color
        )));
    }

    if light.blink_interval_ms == 0
        || light.discovery_interval_secs == 0
        || light.refresh_interval_secs == 0
    {
        return Err(LightError::Config("light intervals must be non-zero".to_string()));
    }

    Ok(())
}

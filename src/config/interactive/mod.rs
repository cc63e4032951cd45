
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{BackendKind, Config, ConfigError, KeywordsConfig, OllamaConfig};
use crate::embeddings::windowing::WindowingConfig;

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 FocusGate Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Embedding Backend").bold().yellow());
    eprintln!("Choose how page text is turned into embeddings.");
    eprintln!();

    config.backend.kind = select_backend(config.backend.kind)?;

    if config.backend.kind == BackendKind::Ollama {
        eprintln!();
        eprintln!("{}", style("Ollama Configuration").bold().yellow());
        configure_ollama(&mut config.ollama)?;

        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());

        if test_ollama_connection(&config.ollama) {
            eprintln!("{}", style("✓ Ollama connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("You can continue, but make sure Ollama is running before classifying.");
        }
    } else {
        let dimension: usize = Input::new()
            .with_prompt("Hashing embedding dimension")
            .default(config.hashing.dimension)
            .validate_with(|input: &usize| -> Result<(), &str> {
                if (16..=4096).contains(input) {
                    Ok(())
                } else {
                    Err("Dimension must be between 16 and 4096")
                }
            })
            .interact_text()?;
        config.hashing.dimension = dimension;
    }

    eprintln!();
    eprintln!("{}", style("Text Windowing").bold().yellow());
    configure_windowing(&mut config.windowing)?;

    eprintln!();
    eprintln!("{}", style("Default Keywords").bold().yellow());
    eprintln!("Comma-separated topics used when a request brings no keyword lists.");
    configure_keywords(&mut config.keywords)?;

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Backend:").bold().yellow());
    eprintln!("  Kind: {}", style(backend_label(config.backend.kind)).cyan());

    match config.backend.kind {
        BackendKind::Ollama => {
            eprintln!();
            eprintln!("{}", style("Ollama Settings:").bold().yellow());
            eprintln!("  Host: {}", style(&config.ollama.host).cyan());
            eprintln!("  Port: {}", style(config.ollama.port).cyan());
            eprintln!("  Model: {}", style(&config.ollama.model).cyan());
            eprintln!(
                "  Timeout: {}s, {} attempts",
                style(config.ollama.timeout_seconds).cyan(),
                style(config.ollama.retry_attempts).cyan()
            );
            eprintln!(
                "  Pull Missing Model: {}",
                style(config.ollama.pull_missing_model).cyan()
            );
            match config.ollama_url() {
                Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
                Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
            }
        }
        BackendKind::Hashing => {
            eprintln!("  Dimension: {}", style(config.hashing.dimension).cyan());
        }
    }

    eprintln!();
    eprintln!("{}", style("Windowing:").bold().yellow());
    eprintln!(
        "  Window Size: {} tokens",
        style(config.windowing.window_size).cyan()
    );
    eprintln!("  Overlap: {} tokens", style(config.windowing.overlap).cyan());

    eprintln!();
    eprintln!("{}", style("Keywords:").bold().yellow());
    eprintln!("  Blocked: {}", style(config.keywords.blocked.join(", ")).cyan());
    eprintln!("  Allowed: {}", style(config.keywords.allowed.join(", ")).cyan());

    eprintln!();
    eprintln!("{}", style("Server:").bold().yellow());
    eprintln!(
        "  Request Timeout: {}s",
        style(config.server.request_timeout_secs).cyan()
    );
    eprintln!("  Preload Model: {}", style(config.server.preload).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn backend_label(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Ollama => "ollama",
        BackendKind::Hashing => "hashing",
    }
}

fn load_existing_config() -> Result<Config> {
    Config::load().map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: Config::config_dir()?,
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn select_backend(current: BackendKind) -> Result<BackendKind> {
    let kinds = [BackendKind::Ollama, BackendKind::Hashing];
    let labels = ["ollama (local model server)", "hashing (offline, no model)"];
    let default_index = kinds.iter().position(|&k| k == current).unwrap_or(0);

    let index = Select::new()
        .with_prompt("Embedding backend")
        .default(default_index)
        .items(&labels)
        .interact()?;

    Ok(kinds.get(index).copied().unwrap_or_default())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let timeout_seconds: u64 = Input::new()
        .with_prompt("Request timeout in seconds")
        .default(ollama.timeout_seconds)
        .validate_with(|input: &u64| -> Result<(), &str> {
            if (1..=600).contains(input) {
                Ok(())
            } else {
                Err("Timeout must be between 1 and 600 seconds")
            }
        })
        .interact_text()?;

    let pull_missing_model = Confirm::new()
        .with_prompt("Download the model when the server does not have it?")
        .default(ollama.pull_missing_model)
        .interact()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_timeout_seconds(timeout_seconds)?;
    ollama.pull_missing_model = pull_missing_model;

    Ok(())
}

fn configure_windowing(windowing: &mut WindowingConfig) -> Result<()> {
    let window_size: usize = Input::new()
        .with_prompt("Window size in tokens")
        .default(windowing.window_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=8192).contains(input) {
                Ok(())
            } else {
                Err("Window size must be between 1 and 8192")
            }
        })
        .interact_text()?;

    let overlap: usize = Input::new()
        .with_prompt("Overlap between windows in tokens")
        .default(windowing.overlap.min(window_size.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input < window_size {
                Ok(())
            } else {
                Err("Overlap must be smaller than the window size")
            }
        })
        .interact_text()?;

    windowing.window_size = window_size;
    windowing.overlap = overlap;
    Ok(())
}

fn configure_keywords(keywords: &mut KeywordsConfig) -> Result<()> {
    let blocked: String = Input::new()
        .with_prompt("Blocked topics")
        .default(keywords.blocked.join(", "))
        .interact_text()?;

    let allowed: String = Input::new()
        .with_prompt("Allowed topics")
        .default(keywords.allowed.join(", "))
        .interact_text()?;

    keywords.blocked = parse_keyword_list(&blocked);
    keywords.allowed = parse_keyword_list(&allowed);
    Ok(())
}

/// Split a comma-separated list, dropping blank entries
#[inline]
pub fn parse_keyword_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(str::to_string)
        .collect()
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}


use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;
use std::time::Duration;

use super::{
    Config, EmbeddingConfig, GenerationConfig, HashingEmbeddingConfig, OllamaEmbeddingConfig,
    OllamaGenerationConfig, OpenAiGenerationConfig,
};

#[inline]
pub fn run_interactive_config(data_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Doc Vault Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(data_dir)?;

    eprintln!("{}", style("Embedding").bold().yellow());
    eprintln!("Choose the model that turns document chunks into vectors.");
    eprintln!();
    config.embedding = configure_embedding(&config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Answer generation").bold().yellow());
    eprintln!("Choose the service that composes answers from retrieved chunks.");
    eprintln!();
    config.generation = configure_generation(&config.generation)?;

    eprintln!();
    eprintln!("{}", style("Import").bold().yellow());
    configure_import(&mut config)?;

    if let Some(url) = ollama_probe_url(&config) {
        eprintln!();
        eprintln!("{}", style("Testing Ollama connection...").yellow());
        if probe(&url) {
            eprintln!("{}", style("✓ Ollama connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("You can continue, but make sure Ollama is running before importing.");
        }
    }

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
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding:").bold().yellow());
    match config.embedding {
        EmbeddingConfig::Hashing(ref hashing) => {
            eprintln!("  Provider: {}", style("hashing (local)").cyan());
            eprintln!("  Dimension: {}", style(hashing.dimension).cyan());
        }
        EmbeddingConfig::Ollama(ref ollama) => {
            eprintln!("  Provider: {}", style("ollama").cyan());
            match ollama.ollama_url() {
                Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
                Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
            }
            eprintln!("  Model: {}", style(&ollama.model).cyan());
            eprintln!("  Dimension: {}", style(ollama.dimension).cyan());
        }
    }

    eprintln!();
    eprintln!("{}", style("Generation:").bold().yellow());
    match config.generation {
        GenerationConfig::Ollama(ref ollama) => {
            eprintln!("  Provider: {}", style("ollama").cyan());
            match ollama.ollama_url() {
                Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
                Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
            }
            eprintln!("  Model: {}", style(&ollama.model).cyan());
            eprintln!("  Timeout: {}s", style(ollama.timeout_secs).cyan());
        }
        GenerationConfig::OpenAi(ref openai) => {
            eprintln!("  Provider: {}", style("openai-compatible").cyan());
            eprintln!("  URL: {}", style(&openai.base_url).cyan());
            eprintln!("  Model: {}", style(&openai.model).cyan());
            eprintln!("  API key from: ${}", style(&openai.api_key_env).cyan());
            eprintln!("  Timeout: {}s", style(openai.timeout_secs).cyan());
        }
    }

    eprintln!();
    eprintln!("{}", style("Import:").bold().yellow());
    eprintln!("  Chunk Size: {}", style(config.import.chunk_size).cyan());
    eprintln!("  Overlap: {}", style(config.import.overlap_size).cyan());
    eprintln!(
        "  Strategy: {}",
        style(config.import.parsing_strategy).cyan()
    );
    eprintln!(
        "  File Types: {}",
        style(config.import.file_types.join(", ")).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Search:").bold().yellow());
    eprintln!("  Limit: {}", style(config.search.default_limit).cyan());
    eprintln!("  Min Score: {}", style(config.search.min_score).cyan());
    eprintln!(
        "  Over-fetch: {}x",
        style(config.search.overfetch_factor).cyan()
    );

    eprintln!();
    eprintln!("Data directory: {}", style(config.get_base_dir().display()).dim());
}

fn load_existing_config(data_dir: &Path) -> Result<Config> {
    Config::load(data_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No usable configuration found. Using defaults.").yellow()
            );
            Ok(Config::with_base_dir(data_dir))
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_embedding(current: &EmbeddingConfig) -> Result<EmbeddingConfig> {
    let providers = &["hashing (local, no model needed)", "ollama"];
    let default_index = match *current {
        EmbeddingConfig::Hashing(_) => 0,
        EmbeddingConfig::Ollama(_) => 1,
    };

    let choice = Select::new()
        .with_prompt("Embedding provider")
        .default(default_index)
        .items(providers)
        .interact()?;

    let dimension: usize = Input::new()
        .with_prompt("Embedding dimension")
        .default(current.dimension())
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (8..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 8 and 4096")
            }
        })
        .interact_text()?;

    if choice == 0 {
        return Ok(EmbeddingConfig::Hashing(HashingEmbeddingConfig { dimension }));
    }

    let existing = match *current {
        EmbeddingConfig::Ollama(ref ollama) => ollama.clone(),
        EmbeddingConfig::Hashing(_) => OllamaEmbeddingConfig::default(),
    };
    let (host, port) = prompt_endpoint(&existing.host, existing.port)?;
    let model = prompt_model("Embedding model", &existing.model)?;

    Ok(EmbeddingConfig::Ollama(OllamaEmbeddingConfig {
        host,
        port,
        model,
        dimension,
        ..existing
    }))
}

fn configure_generation(current: &GenerationConfig) -> Result<GenerationConfig> {
    let providers = &["ollama", "openai-compatible"];
    let default_index = match *current {
        GenerationConfig::Ollama(_) => 0,
        GenerationConfig::OpenAi(_) => 1,
    };

    let choice = Select::new()
        .with_prompt("Generation provider")
        .default(default_index)
        .items(providers)
        .interact()?;

    if choice == 0 {
        let existing = match *current {
            GenerationConfig::Ollama(ref ollama) => ollama.clone(),
            GenerationConfig::OpenAi(_) => OllamaGenerationConfig::default(),
        };
        let (host, port) = prompt_endpoint(&existing.host, existing.port)?;
        let model = prompt_model("Generation model", &existing.model)?;
        return Ok(GenerationConfig::Ollama(OllamaGenerationConfig {
            host,
            port,
            model,
            ..existing
        }));
    }

    let existing = match *current {
        GenerationConfig::OpenAi(ref openai) => openai.clone(),
        GenerationConfig::Ollama(_) => OpenAiGenerationConfig::default(),
    };
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(existing.base_url.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            url::Url::parse(input)
                .map(|_| ())
                .map_err(|_| "Must be a valid URL")
        })
        .interact_text()?;
    let model = prompt_model("Generation model", &existing.model)?;
    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(existing.api_key_env.clone())
        .interact_text()?;

    Ok(GenerationConfig::OpenAi(OpenAiGenerationConfig {
        base_url,
        model,
        api_key_env,
        ..existing
    }))
}

fn configure_import(config: &mut Config) -> Result<()> {
    let chunk_size: usize = Input::new()
        .with_prompt("Chunk size (characters)")
        .default(config.import.chunk_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=100_000).contains(input) {
                Ok(())
            } else {
                Err("Chunk size must be between 1 and 100000")
            }
        })
        .interact_text()?;

    let overlap_size: usize = Input::new()
        .with_prompt("Chunk overlap (characters)")
        .default(config.import.overlap_size.min(chunk_size.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input < chunk_size {
                Ok(())
            } else {
                Err("Overlap must be smaller than the chunk size")
            }
        })
        .interact_text()?;

    config.import.chunk_size = chunk_size;
    config.import.overlap_size = overlap_size;
    Ok(())
}

fn prompt_endpoint(host: &str, port: u16) -> Result<(String, u16)> {
    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(host.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Host cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    Ok((host, port))
}

fn prompt_model(prompt: &str, current: &str) -> Result<String> {
    let model: String = Input::new()
        .with_prompt(prompt)
        .default(current.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(model)
}

/// The first Ollama endpoint the configuration talks to, if any
fn ollama_probe_url(config: &Config) -> Option<String> {
    let base = match (&config.embedding, &config.generation) {
        (EmbeddingConfig::Ollama(ollama), _) => ollama.ollama_url().ok(),
        (_, GenerationConfig::Ollama(ollama)) => ollama.ollama_url().ok(),
        (EmbeddingConfig::Hashing(_), GenerationConfig::OpenAi(_)) => None,
    }?;
    base.join("/api/version").ok().map(String::from)
}

fn probe(url: &str) -> bool {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}

// Configuration management module
// TOML settings for providers, import, index and search tuning

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, EmbeddingConfig, GenerationConfig, HashingEmbeddingConfig,
    ImportSettings, IndexSettings, OllamaEmbeddingConfig, OllamaGenerationConfig,
    OpenAiGenerationConfig, RagSettings, SearchSettings, validate_min_score,
};

use std::path::{Path, PathBuf};

/// Resolve the data directory, preferring an explicit override
#[inline]
pub fn resolve_data_dir(override_dir: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Config::default_data_dir(),
    }
}

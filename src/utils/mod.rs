//! Common utilities

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default model cache directory (`~/.cache/lexrag/models`)
pub fn get_models_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
    let models_dir = Path::new(&home).join(".cache/lexrag/models");
    fs::create_dir_all(&models_dir)
        .context(format!("Failed to create models directory: {:?}", models_dir))?;
    Ok(models_dir)
}

/// Cut `text` to at most `max_chars` characters, appending "..." when cut
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

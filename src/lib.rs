//! # Awful Roleplay (library root)
//!
//! This crate provides the prompt engine behind the **`rp`** CLI:
//! - Roleplay state model and dialogue-graph selectors (`narration`).
//! - Prompt strategies for roleplay turns, inner thoughts, reply and scene
//!   suggestions and image descriptions (`strategy`).
//! - A token-budget prompt builder that fits as much history as possible into
//!   the model's context window (`builder`).
//! - A streaming completion client that turns the service's JSON chunks into
//!   cumulative snapshots (`api`).
//! - Keyword lorebook matching (`lorebook`).
//! - Instruction-template families, template filling and response parsing
//!   (`instruct`, `template`), token counting (`tokenizer`).
//! - CLI parsing & configuration (`commands`, `config`).
//!
//! ## Configuration layout
//! `rp init` writes `config.yaml` and a sample `state.yaml` under your
//! per-platform config directory, e.g.:
//!
//! - macOS: `~/Library/Application Support/com.awful-sec.rp`
//! - Linux (XDG): `~/.config/rp`
//! - Windows: `C:\Users\<you>\AppData\Roaming\awful-sec\rp\config`
//!
//! ## Modules
//! - [`api`], [`builder`], [`commands`], [`config`], [`error`], [`instruct`],
//!   [`lorebook`], [`narration`], [`strategy`], [`template`], [`tokenizer`]

use directories::ProjectDirs;
use std::error::Error;
use std::path::PathBuf;

pub mod api;
pub mod builder;
pub mod commands;
pub mod config;
pub mod error;
pub mod instruct;
pub mod lorebook;
pub mod narration;
pub mod strategy;
pub mod template;
pub mod tokenizer;

#[cfg(test)]
mod fixtures;

/// Return the per-platform configuration directory used by `rp`.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "awful-sec", "rp")`.
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```rust
/// let cfg = awful_rp::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "awful-sec", "rp")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

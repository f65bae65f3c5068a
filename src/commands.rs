//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! Parsing command-line arguments:
//!
//! ```no_run
//! use clap::Parser;
//! use awful_rp::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Prompt { state, .. } => println!("building from {}", state.display()),
//!     _ => {}
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::instruct::InstructSlug;
use crate::strategy::StrategyKind;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Configuration file; defaults to `config.yaml` in the platform config directory.
    #[arg(long, short = 'c', env = "RP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the configured instruction template.
    #[arg(long, short = 'i', value_enum, global = true)]
    pub instruct: Option<InstructSlug>,

    /// Forces the `<think>` block on or off for roleplay prompts.
    #[arg(long, global = true)]
    pub reasoning: Option<bool>,

    /// Overrides the prompt language (`en`, `es`).
    #[arg(long, short = 'l', global = true)]
    pub language: Option<String>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Build a prompt from a state file and print it without contacting the service.
    #[clap(name = "prompt", alias = "p")]
    Prompt {
        /// Roleplay state file (YAML or JSON).
        #[arg(long, short = 's')]
        state: PathBuf,

        /// Character to answer as; defaults to the selected character.
        #[arg(long)]
        character: Option<String>,

        #[arg(long, value_enum, default_value_t = StrategyKind::Roleplay)]
        strategy: StrategyKind,

        /// Generate a single scene from this prompt (scene suggestions only).
        #[arg(long)]
        scene_prompt: Option<String>,

        /// Print the whole prompt template as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Stream the next roleplay turn from the completion service.
    #[clap(name = "generate", alias = "g")]
    Generate {
        #[arg(long, short = 's')]
        state: PathBuf,

        #[arg(long)]
        character: Option<String>,

        /// Yes/No conditions checked once the turn is complete. Repeatable.
        #[arg(long = "condition")]
        conditions: Vec<String>,
    },

    /// Estimate the token count of a prompt template file.
    #[clap(name = "tokens", alias = "t")]
    Tokens {
        file: PathBuf,
    },

    /// Write a default configuration and a sample state file.
    ///
    /// Both land in the platform config directory.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_with_strategy() {
        let cli = Cli::parse_from([
            "rp",
            "--instruct",
            "alpaca",
            "prompt",
            "-s",
            "state.yaml",
            "--strategy",
            "scene-suggestion",
            "--scene-prompt",
            "a beach at dusk",
        ]);

        assert_eq!(cli.instruct, Some(InstructSlug::Alpaca));
        match cli.command {
            Commands::Prompt {
                state,
                strategy,
                scene_prompt,
                json,
                ..
            } => {
                assert_eq!(state, PathBuf::from("state.yaml"));
                assert_eq!(strategy, StrategyKind::SceneSuggestion);
                assert_eq!(scene_prompt.as_deref(), Some("a beach at dusk"));
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_repeated_conditions() {
        let cli = Cli::parse_from([
            "rp",
            "generate",
            "-s",
            "state.yaml",
            "--condition",
            "Nala left the hall",
            "--condition",
            "Anon is angry",
            "--language",
            "es",
            "--reasoning",
            "true",
        ]);

        assert_eq!(cli.language.as_deref(), Some("es"));
        assert_eq!(cli.reasoning, Some(true));
        match cli.command {
            Commands::Generate { conditions, character, .. } => {
                assert_eq!(conditions, vec!["Nala left the hall", "Anon is angry"]);
                assert!(character.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let parsed = Cli::try_parse_from(["rp", "prompt", "-s", "x.yaml", "--strategy", "battle"]);
        assert!(parsed.is_err());
    }
}

//! Main module for the Awful Roleplay CLI application (rp).
//!
//! This module provides the main function and auxiliary functionalities for
//! the CLI application. It handles command parsing, configuration loading, and
//! initialization, as well as invoking the appropriate functionalities based on
//! the provided command-line arguments.
//!
//! # Examples
//!
//! Printing the prompt for the next turn of a saved roleplay:
//!
//! ```sh
//! cargo run -- prompt --state state.yaml
//! rp prompt --state state.yaml --strategy response-suggestion
//! ```
//!
//! Streaming the next turn and checking a condition afterwards:
//!
//! ```sh
//! rp generate --state state.yaml --condition "Nala left the hall"
//! ```
//!
//! Initializing the application's configuration and a sample state:
//!
//! ```sh
//! rp init
//! ```

use awful_rp::api::{self, CompletionClient};
use awful_rp::builder::PromptBuilder;
use awful_rp::commands::{self, Commands};
use awful_rp::config::{self, RpConfig};
use awful_rp::config_dir;
use awful_rp::error::RpError;
use awful_rp::narration::{
    self, Character, CharacterResponse, Novel, Response, RoleplayState, Scene, SceneCharacter,
    Start,
};
use awful_rp::strategy::StrategyKind;
use awful_rp::strategy::image::ImageGenerationStrategy;
use awful_rp::strategy::inner_thoughts::InnerThoughtsStrategy;
use awful_rp::strategy::roleplay::{RoleplayInput, RoleplayStrategy, continue_existing_text};
use awful_rp::strategy::suggestion::{
    ResponseSuggestionStrategy, SceneSuggestionInput, SceneSuggestionStrategy,
};
use awful_rp::strategy::PromptStrategy;
use awful_rp::template::{PromptTemplate, count_template_tokens};
use awful_rp::tokenizer::TiktokenTokenizer;
use clap::Parser;
use futures::future::join_all;
use once_cell::sync::OnceCell;
use std::{error::Error, fs, path::Path};
use tracing::{debug, info, warn};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Main asynchronous function of the `rp` CLI application.
///
/// Parses command-line arguments, loads configuration, and executes the
/// appropriate command.
///
/// # Errors
///
/// Returns an error if there is an issue loading the configuration or the
/// state file, talking to the completion service, or writing output.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = commands::Cli::parse();

    let mut rp_config = match &cli.config {
        Some(path) => config::load_config(&path.to_string_lossy())?,
        None => {
            let path = config_dir()?.join("config.yaml");
            if path.exists() {
                config::load_config(&path.to_string_lossy())?
            } else {
                warn!("No config at {}, using defaults", path.display());
                RpConfig::default()
            }
        }
    };
    if let Some(instruct) = cli.instruct {
        rp_config.instruct_template = instruct;
    }
    if let Some(language) = cli.language {
        rp_config.language = language;
    }
    if cli.reasoning.is_some() {
        rp_config.reasoning = cli.reasoning;
    }
    debug!("Config loaded: {:?}", rp_config);

    match cli.command {
        Commands::Prompt {
            state,
            character,
            strategy,
            scene_prompt,
            json,
        } => {
            let state = narration::load_state(&state)?;
            prompt(&rp_config, state, character, strategy, scene_prompt, json)?;
        }
        Commands::Generate {
            state,
            character,
            conditions,
        } => {
            let state = narration::load_state(&state)?;
            generate(&rp_config, state, character, &conditions).await?;
        }
        Commands::Tokens { file } => {
            let template = fs::read_to_string(&file)?;
            let tokenizer = TiktokenTokenizer::shared()?;
            println!("{}", count_template_tokens(tokenizer.as_ref(), &template));
        }
        Commands::Init => {
            debug!("Initializing configuration");
            init()?;
        }
    }

    Ok(())
}

fn resolve_character(state: &RoleplayState, requested: Option<String>) -> Result<String, RpError> {
    let id = match requested {
        Some(id) => id,
        None => state
            .speaking_character_id()
            .map(str::to_string)
            .ok_or_else(|| RpError::UnknownCharacter("<none selected>".to_string()))?,
    };
    if state.character(&id).is_none() {
        return Err(RpError::UnknownCharacter(id));
    }
    Ok(id)
}

fn roleplay_builder(
    config: &RpConfig,
    state: &RoleplayState,
) -> Result<PromptBuilder<RoleplayStrategy>, RpError> {
    let language = prompt_language(config, state);
    debug!(instruct = %config.instruct_template, language, "Roleplay strategy");
    let mut strategy =
        RoleplayStrategy::new(config.instruct_template, language, TiktokenTokenizer::shared()?);
    if let Some(reasoning) = config.reasoning {
        strategy = strategy.with_reasoning(reasoning);
    }
    Ok(PromptBuilder::new(
        strategy,
        config.truncation_length,
        config.max_new_tokens,
    ))
}

/// The state's own language wins over the configured one.
fn prompt_language<'a>(config: &'a RpConfig, state: &'a RoleplayState) -> &'a str {
    if state.settings.language.is_empty() {
        &config.language
    } else {
        &state.settings.language
    }
}

fn print_prompt(prompt: &PromptTemplate, json: bool) -> Result<(), Box<dyn Error>> {
    info!(total_tokens = prompt.total_tokens, "Prompt built");
    if json {
        println!("{}", serde_json::to_string_pretty(prompt)?);
    } else {
        println!("{}", prompt.template);
    }
    Ok(())
}

fn build_with<S: PromptStrategy>(
    strategy: S,
    config: &RpConfig,
    input: &S::Input,
) -> PromptTemplate {
    PromptBuilder::new(strategy, config.truncation_length, config.max_new_tokens)
        .build_prompt(input, config.max_memory)
}

fn prompt(
    config: &RpConfig,
    state: RoleplayState,
    character: Option<String>,
    kind: StrategyKind,
    scene_prompt: Option<String>,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let slug = config.instruct_template;
    let language = prompt_language(config, &state).to_string();
    let tokenizer = TiktokenTokenizer::shared()?;

    let prompt = match kind {
        StrategyKind::Roleplay => {
            let input = RoleplayInput {
                current_character_id: resolve_character(&state, character)?,
                state,
            };
            roleplay_builder(config, &input.state)?.build_prompt(&input, config.max_memory)
        }
        StrategyKind::InnerThoughts => build_with(
            InnerThoughtsStrategy::new(slug, &language, tokenizer),
            config,
            &state,
        ),
        StrategyKind::ResponseSuggestion => build_with(
            ResponseSuggestionStrategy::new(slug, &language, tokenizer),
            config,
            &state,
        ),
        StrategyKind::SceneSuggestion => build_with(
            SceneSuggestionStrategy::new(slug, &language, tokenizer),
            config,
            &SceneSuggestionInput {
                state,
                single_scene_prompt: scene_prompt,
            },
        ),
        StrategyKind::Image => build_with(
            ImageGenerationStrategy::new(slug, &language, tokenizer),
            config,
            &state,
        ),
    };

    print_prompt(&prompt, json)
}

/// Stream one roleplay turn, fold it into the current response, then run the
/// condition checks concurrently.
async fn generate(
    config: &RpConfig,
    state: RoleplayState,
    character: Option<String>,
    conditions: &[String],
) -> Result<(), Box<dyn Error>> {
    let input = RoleplayInput {
        current_character_id: resolve_character(&state, character)?,
        state,
    };
    let builder = roleplay_builder(config, &input.state)?;
    let prompt = builder.build_prompt(&input, config.max_memory);
    let client = CompletionClient::from_config(config);

    let stream = client.stream(&prompt).await?;
    let snapshot = api::print_stream(stream, "text").await?;

    let current = input.state.current_response().cloned().unwrap_or_default();
    let continued = continue_existing_text(&input, &snapshot);
    let response = builder.complete_response(&input, &current, &continued);
    print!("{}", serde_yaml::to_string(&response)?);

    if conditions.is_empty() {
        return Ok(());
    }

    let strategy = builder.strategy();
    let checks = conditions.iter().map(|condition| {
        let check = strategy.build_condition_prompt(&input, &prompt, &snapshot, condition);
        let client = &client;
        async move { client.complete(&check).await }
    });
    let answers = join_all(checks).await;

    for (condition, answer) in conditions.iter().zip(answers) {
        let answer = answer?;
        let happened = answer.get("cond").map(|cond| cond.trim()) == Some("Yes");
        info!(condition = %condition, happened, "Condition checked");
        println!("{condition}: {}", if happened { "yes" } else { "no" });
    }

    Ok(())
}

/// Initializes the application's configuration and a sample state.
///
/// Creates the configuration directory and writes `config.yaml` and
/// `state.yaml` in YAML format.
///
/// # Errors
///
/// Returns an error if there is an issue creating the directory or files, or
/// serializing the configuration and state to YAML.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = config_dir()?;
    info!("Creating config directory: {}", config_dir.display());
    fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.yaml");
    info!("Creating config file: {}", config_path.display());
    write_yaml(&config_path, &RpConfig::default())?;

    let state_path = config_dir.join("state.yaml");
    info!("Creating sample state file: {}", state_path.display());
    write_yaml(&state_path, &sample_state())?;

    Ok(())
}

fn write_yaml<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn Error>> {
    let yaml = serde_yaml::to_string(value)?;
    fs::write(path, yaml)?;
    Ok(())
}

/// One character greeting the user in one scene.
fn sample_state() -> RoleplayState {
    let mut state = RoleplayState {
        novel: Novel {
            characters: vec![Character {
                id: "nala".to_string(),
                name: "Nala".to_string(),
                description: "{{char}} is a cheerful maid who serves {{user}}.".to_string(),
                personality: "Likes: tea, gossip\nDislikes: dust".to_string(),
                ..Character::default()
            }],
            scenes: vec![Scene {
                id: "main-hall".to_string(),
                name: "Main hall".to_string(),
                prompt: "Nala waits in the main hall of the mansion.".to_string(),
                characters: vec![SceneCharacter {
                    character_id: "nala".to_string(),
                    objective: None,
                }],
                ..Scene::default()
            }],
            starts: vec![Start {
                id: "start".to_string(),
                scene_id: "main-hall".to_string(),
            }],
            ..Novel::default()
        },
        ..RoleplayState::default()
    };

    state.narration.current_response_id = "start".to_string();
    state.narration.responses.insert(
        "start".to_string(),
        Response {
            id: "start".to_string(),
            selected: true,
            selected_character_id: Some("nala".to_string()),
            characters: vec![CharacterResponse {
                character_id: "nala".to_string(),
                text: "Good morning! Shall I bring your tea?".to_string(),
                emotion: "happy".to_string(),
                ..CharacterResponse::default()
            }],
            ..Response::default()
        },
    );
    state
}

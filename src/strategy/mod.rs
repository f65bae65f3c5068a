//! # Prompt strategies
//!
//! A strategy turns typed application state into a model-specific template
//! and later folds streamed generation slots back into a typed answer. The
//! [`PromptBuilder`](crate::builder::PromptBuilder) is generic over
//! [`PromptStrategy`] and never inspects the concrete type.
//!
//! Families:
//! - [`roleplay::RoleplayStrategy`]: the next character turn (reaction + text)
//! - [`inner_thoughts::InnerThoughtsStrategy`]: first-person thoughts for a turn
//! - [`suggestion::ResponseSuggestionStrategy`]: three replies for the user
//! - [`suggestion::SceneSuggestionStrategy`]: where the story could go next
//! - [`image::ImageGenerationStrategy`]: an image-generation description
//!
//! Strategies hold only fixed configuration ([`StrategyBase`]) and can be
//! reused across any number of builds.

use std::collections::HashMap;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::instruct::{InstructSlug, InstructTemplate};
use crate::template::{GenerationVariables, PromptTemplate, count_template_tokens};
use crate::tokenizer::Tokenizer;

pub mod image;
pub mod inner_thoughts;
pub mod roleplay;
pub mod suggestion;

/// Contract shared by every strategy family.
///
/// `build_guidance_prompt` must be pure, and `total_tokens` must not decrease
/// as `memory_size` grows; the builder's binary search relies on both.
pub trait PromptStrategy {
    type Input;
    type Output;

    fn tokenizer(&self) -> &dyn Tokenizer;

    /// Build a template that includes at most `memory_size` units of history.
    fn build_guidance_prompt(
        &self,
        max_new_tokens: usize,
        memory_size: usize,
        input: &Self::Input,
    ) -> PromptTemplate;

    /// Merge the latest snapshot into `response`, returning a new value.
    /// Unknown or missing slots fall back to what `response` already holds.
    fn complete_response(
        &self,
        input: &Self::Input,
        response: &Self::Output,
        variables: &GenerationVariables,
    ) -> Self::Output;

    /// Literal tokens plus every `max_tokens=` reservation in directives.
    fn count_tokens(&self, template: &str) -> usize {
        count_template_tokens(self.tokenizer(), template)
    }
}

/// Strategy families selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Roleplay,
    InnerThoughts,
    ResponseSuggestion,
    SceneSuggestion,
    Image,
}

/// Per-language label tables: language → key → text.
pub type Labels = HashMap<&'static str, HashMap<&'static str, &'static str>>;

/// Build a [`Labels`] table from static slices.
pub fn labels(languages: &[(&'static str, &[(&'static str, &'static str)])]) -> Labels {
    languages
        .iter()
        .map(|(language, entries)| (*language, entries.iter().copied().collect()))
        .collect()
}

/// Look up `key` for `language` (falling back to `en`, then to the key
/// itself) and replace each `%` with the next argument.
pub fn i18n(labels: &Labels, language: &str, key: &str, args: &[&str]) -> String {
    let label = labels
        .get(language)
        .and_then(|table| table.get(key))
        .or_else(|| labels.get("en").and_then(|table| table.get(key)))
        .copied()
        .unwrap_or(key);

    let mut args = args.iter();
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c == '%' {
            if let Some(arg) = args.next() {
                out.push_str(arg);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Configuration every strategy carries.
#[derive(Clone)]
pub struct StrategyBase {
    pub instruct: InstructSlug,
    pub language: String,
    pub tokenizer: Arc<dyn Tokenizer>,
}

impl StrategyBase {
    pub fn new(instruct: InstructSlug, language: &str, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            instruct,
            language: language.to_string(),
            tokenizer,
        }
    }

    pub fn template(&self) -> &'static InstructTemplate {
        self.instruct.template()
    }

    pub fn label(&self, labels: &Labels, key: &str, args: &[&str]) -> String {
        i18n(labels, &self.language, key, args)
    }
}

impl std::fmt::Debug for StrategyBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyBase")
            .field("instruct", &self.instruct)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

//! # Prompt builder
//!
//! Fits as much history as possible into a model's context window.
//!
//! The builder owns a [`PromptStrategy`] and two budget knobs:
//! - `truncation_length`: the hard token ceiling for prompt plus generation,
//! - `max_new_tokens`: tokens reserved for the answer.
//!
//! [`PromptBuilder::build_prompt`] binary-searches `memory_size` in
//! `[0, max_memory]` for the largest value whose estimated total stays within
//! `truncation_length - max_new_tokens`. Each probe rebuilds the template, so
//! the search costs `O(log max_memory)` strategy calls instead of one call per
//! candidate size.
//!
//! ```rust
//! use awful_rp::builder::PromptBuilder;
//! use awful_rp::instruct::InstructSlug;
//! use awful_rp::strategy::suggestion::ResponseSuggestionStrategy;
//! use awful_rp::narration::RoleplayState;
//! use awful_rp::tokenizer::TiktokenTokenizer;
//!
//! let tokenizer = TiktokenTokenizer::shared().unwrap();
//! let strategy = ResponseSuggestionStrategy::new(InstructSlug::Chatml, "en", tokenizer);
//! let builder = PromptBuilder::new(strategy, 4096, 60);
//!
//! let prompt = builder.build_prompt(&RoleplayState::default(), 100);
//! assert!(prompt.total_tokens <= 4096);
//! ```

use tracing::debug;

use crate::strategy::PromptStrategy;
use crate::template::{GenerationVariables, PromptTemplate};

/// Budget-aware front end over one strategy.
#[derive(Debug, Clone)]
pub struct PromptBuilder<S: PromptStrategy> {
    strategy: S,
    truncation_length: usize,
    max_new_tokens: usize,
}

impl<S: PromptStrategy> PromptBuilder<S> {
    pub fn new(strategy: S, truncation_length: usize, max_new_tokens: usize) -> Self {
        Self {
            strategy,
            truncation_length,
            max_new_tokens,
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn truncation_length(&self) -> usize {
        self.truncation_length
    }

    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    /// Model metadata can change the context size mid-session.
    pub fn set_truncation_length(&mut self, truncation_length: usize) {
        self.truncation_length = truncation_length;
    }

    /// Swap the strategy, keeping the budget settings.
    pub fn set_strategy(&mut self, strategy: S) {
        self.strategy = strategy;
    }

    fn budget(&self) -> usize {
        self.truncation_length.saturating_sub(self.max_new_tokens)
    }

    /// Largest memory size whose prompt fits the budget, or 0 when none does.
    pub fn find_memory_size(&self, input: &S::Input, max_memory: usize) -> usize {
        let budget = self.budget();
        let mut low = 0;
        let mut high = max_memory;

        while low <= high {
            let mid = low + (high - low) / 2;
            let tokens = self
                .strategy
                .build_guidance_prompt(self.max_new_tokens, mid, input)
                .total_tokens;

            if tokens > budget {
                if mid == 0 {
                    break;
                }
                high = mid - 1;
            } else {
                match mid.checked_add(1) {
                    Some(next) => low = next,
                    // Every size up to `usize::MAX` fits.
                    None => return mid,
                }
            }
        }

        // `low` is the first size that does not fit.
        low.saturating_sub(1)
    }

    /// Build the largest prompt that fits the budget.
    ///
    /// When not even an empty history fits, the prompt with `memory_size = 0`
    /// is returned anyway; its `total_tokens` then exceeds the budget.
    pub fn build_prompt(&self, input: &S::Input, max_memory: usize) -> PromptTemplate {
        let memory_size = self.find_memory_size(input, max_memory);
        let prompt = self
            .strategy
            .build_guidance_prompt(self.max_new_tokens, memory_size, input);

        debug!(
            memory_size,
            max_memory,
            total_tokens = prompt.total_tokens,
            budget = self.budget(),
            "Built prompt"
        );
        prompt
    }

    pub fn complete_response(
        &self,
        input: &S::Input,
        response: &S::Output,
        variables: &GenerationVariables,
    ) -> S::Output {
        self.strategy.complete_response(input, response, variables)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::fixtures;
    use crate::instruct::InstructSlug;
    use crate::narration::{Dialogue, Response};
    use crate::strategy::roleplay::{RoleplayInput, RoleplayStrategy};
    use crate::template::TemplateVariables;
    use crate::tokenizer::{TiktokenTokenizer, Tokenizer};

    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn encode(&self, text: &str) -> Vec<u32> {
            text.split_whitespace().map(|_| 0).collect()
        }
    }

    /// `total_tokens = base + per_unit * memory_size`.
    struct LinearStrategy {
        base: usize,
        per_unit: usize,
        calls: Cell<usize>,
    }

    impl LinearStrategy {
        fn new(base: usize, per_unit: usize) -> Self {
            Self {
                base,
                per_unit,
                calls: Cell::new(0),
            }
        }
    }

    impl PromptStrategy for LinearStrategy {
        type Input = ();
        type Output = String;

        fn tokenizer(&self) -> &dyn Tokenizer {
            &WordTokenizer
        }

        fn build_guidance_prompt(
            &self,
            _max_new_tokens: usize,
            memory_size: usize,
            _input: &(),
        ) -> PromptTemplate {
            self.calls.set(self.calls.get() + 1);
            PromptTemplate {
                template: format!("memory={memory_size}"),
                variables: TemplateVariables::new(),
                total_tokens: self.base.saturating_add(self.per_unit.saturating_mul(memory_size)),
            }
        }

        fn complete_response(
            &self,
            _input: &(),
            _response: &String,
            variables: &GenerationVariables,
        ) -> String {
            variables.get("text").cloned().unwrap_or_default()
        }
    }

    #[test]
    fn test_picks_largest_fitting_memory() {
        // budget = 400 - 100 = 300; 100 + 10 * 20 = 300 fits, 21 does not.
        let builder = PromptBuilder::new(LinearStrategy::new(100, 10), 400, 100);
        assert_eq!(builder.find_memory_size(&(), 1000), 20);
        assert_eq!(builder.build_prompt(&(), 1000).template, "memory=20");
    }

    #[test]
    fn test_everything_fits() {
        let builder = PromptBuilder::new(LinearStrategy::new(10, 1), 4096, 200);
        assert_eq!(builder.find_memory_size(&(), 50), 50);
        assert_eq!(builder.find_memory_size(&(), 0), 0);
    }

    #[test]
    fn test_nothing_fits_clamps_to_zero() {
        let builder = PromptBuilder::new(LinearStrategy::new(5000, 10), 4096, 200);
        assert_eq!(builder.find_memory_size(&(), 100), 0);
        assert_eq!(builder.build_prompt(&(), 100).template, "memory=0");
    }

    #[test]
    fn test_unbounded_max_memory_when_everything_fits() {
        let builder = PromptBuilder::new(LinearStrategy::new(1, 0), 4096, 200);
        assert_eq!(builder.find_memory_size(&(), usize::MAX), usize::MAX);
        assert!(builder.strategy().calls.get() <= 65);
    }

    #[test]
    fn test_unbounded_max_memory_with_growing_prompt() {
        let builder = PromptBuilder::new(LinearStrategy::new(100, 10), 400, 100);
        assert_eq!(builder.find_memory_size(&(), usize::MAX), 20);
    }

    #[test]
    fn test_budget_smaller_than_reservation() {
        let builder = PromptBuilder::new(LinearStrategy::new(0, 1), 100, 200);
        assert_eq!(builder.find_memory_size(&(), 10), 0);
    }

    #[test]
    fn test_probes_are_logarithmic() {
        let builder = PromptBuilder::new(LinearStrategy::new(100, 3), 2000, 100);
        builder.find_memory_size(&(), 1000);
        assert!(builder.strategy().calls.get() <= 11);
    }

    #[test]
    fn test_setters_keep_other_settings() {
        let mut builder = PromptBuilder::new(LinearStrategy::new(100, 10), 400, 100);
        builder.set_truncation_length(600);
        assert_eq!(builder.find_memory_size(&(), 1000), 40);
        assert_eq!(builder.max_new_tokens(), 100);

        builder.set_strategy(LinearStrategy::new(100, 20));
        assert_eq!(builder.truncation_length(), 600);
        assert_eq!(builder.find_memory_size(&(), 1000), 20);
    }

    #[test]
    fn test_complete_response_forwards() {
        let builder = PromptBuilder::new(LinearStrategy::new(0, 0), 100, 10);
        let mut variables = GenerationVariables::new();
        variables.insert("text".to_string(), "done".to_string());
        assert_eq!(builder.complete_response(&(), &String::new(), &variables), "done");
    }

    fn roleplay_builder(truncation_length: usize) -> PromptBuilder<RoleplayStrategy> {
        let strategy = RoleplayStrategy::new(
            InstructSlug::Alpaca,
            "en",
            TiktokenTokenizer::shared().unwrap(),
        );
        PromptBuilder::new(strategy, truncation_length, 200)
    }

    #[test]
    fn test_single_turn_prompt_end_to_end() {
        let builder = roleplay_builder(4096);
        let input = RoleplayInput {
            state: fixtures::single_turn_state(),
            current_character_id: fixtures::NALA_ID.to_string(),
        };
        let prompt = builder.build_prompt(&input, 1000);

        assert!(prompt.total_tokens < 4096);
        assert_eq!(prompt.template.matches("{{GEN text").count(), 1);
        assert_eq!(prompt.template.matches("{{GEN text max_tokens=200 ").count(), 1);
        for placeholder in ["{{char}}", "{{user}}", "<BOT>", "<USER>", "{{char-nala}}"] {
            assert!(!prompt.template.contains(placeholder), "{placeholder} left in template");
        }
        assert!(prompt.template.contains("Anon: good morning nala."));
        assert!(prompt.template.contains("Currently your role is Nala"));

        let mut snapshot = GenerationVariables::new();
        snapshot.insert("emotion".to_string(), " happy".to_string());
        snapshot.insert("text".to_string(), " Good morning, mistress!".to_string());
        let current: Response = input.state.current_response().unwrap().clone();
        let completed = builder.complete_response(&input, &current, &snapshot);
        assert_eq!(completed.characters[0].text, "Good morning, mistress!");
    }

    #[test]
    fn test_long_history_always_fits() {
        let input = RoleplayInput {
            state: fixtures::long_conversation_state(),
            current_character_id: fixtures::NALA_ID.to_string(),
        };
        let all_dialogues = input
            .state
            .parent_dialogues_with_characters(&[fixtures::NALA_ID], usize::MAX)
            .len();

        let mut previous_memory = 0;
        for truncation_length in (2099..=4095).step_by(100) {
            let builder = roleplay_builder(truncation_length);
            let memory_size = builder.find_memory_size(&input, all_dialogues);
            let prompt = builder.build_prompt(&input, all_dialogues);
            let measured = builder.strategy().count_tokens(&prompt.template);

            assert!(
                measured <= truncation_length - 200,
                "truncation {truncation_length}: {measured} tokens"
            );
            assert!(memory_size < all_dialogues);
            assert!(memory_size >= previous_memory);
            previous_memory = memory_size;
        }
    }

    #[test]
    fn test_history_starts_at_newest_dialogue() {
        let input = RoleplayInput {
            state: fixtures::long_conversation_state(),
            current_character_id: fixtures::NALA_ID.to_string(),
        };
        let builder = roleplay_builder(2048);
        let memory_size = builder.find_memory_size(&input, 1000);
        let prompt = builder.build_prompt(&input, 1000);

        let newest = input
            .state
            .parent_dialogues_with_characters(&[fixtures::NALA_ID], 2)
            .into_iter()
            .find_map(|dialogue| match dialogue {
                Dialogue::Interaction(interaction) => Some(interaction.query.clone()),
                Dialogue::Response(_) => None,
            })
            .unwrap();
        assert!(memory_size >= 2);
        assert!(prompt.template.contains(&newest));
    }
}

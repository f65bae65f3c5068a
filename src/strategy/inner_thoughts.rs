//! First-person inner thoughts for the turn the user selected.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::instruct::InstructSlug;
use crate::narration::{Response, RoleplayState};
use crate::strategy::{Labels, PromptStrategy, StrategyBase, labels};
use crate::template::{GenerationVariables, PromptTemplate, TemplateVariables};
use crate::tokenizer::Tokenizer;

const EN: &[(&str, &str)] = &[
    (
        "system",
        "You are completing the inner thoughts for a character. Generate what the character is thinking based on their response. Write the inner thoughts in first person from the character's perspective (use \"I\", \"me\", \"my\", etc.).",
    ),
    ("inner_thoughts_prompt", "%'s inner thoughts (first person): \""),
];

const ES: &[(&str, &str)] = &[
    (
        "system",
        "Estás completando los pensamientos internos de un personaje. Escribe lo que piensa a partir de su respuesta, en primera persona (\"yo\", \"me\", \"mi\", etc.).",
    ),
    (
        "inner_thoughts_prompt",
        "Pensamientos internos de % (primera persona): \"",
    ),
];

static LABELS: Lazy<Labels> = Lazy::new(|| labels(&[("en", EN), ("es", ES)]));

#[derive(Debug, Clone)]
pub struct InnerThoughtsStrategy {
    base: StrategyBase,
}

impl InnerThoughtsStrategy {
    pub fn new(instruct: InstructSlug, language: &str, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            base: StrategyBase::new(instruct, language, tokenizer),
        }
    }
}

impl PromptStrategy for InnerThoughtsStrategy {
    type Input = RoleplayState;
    type Output = Response;

    fn tokenizer(&self) -> &dyn Tokenizer {
        self.base.tokenizer.as_ref()
    }

    /// Only the selected turn is shown to the model, so `memory_size` has no
    /// effect.
    fn build_guidance_prompt(
        &self,
        max_new_tokens: usize,
        _memory_size: usize,
        state: &RoleplayState,
    ) -> PromptTemplate {
        let t = self.base.template();
        let response = state.current_response();
        let character_id = response
            .and_then(|r| r.selected_character_id.as_deref())
            .unwrap_or_default();
        let name = state
            .character(character_id)
            .map(|c| c.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("Character");
        let text = response
            .and_then(|r| r.character(character_id))
            .map(|turn| turn.text.as_str())
            .unwrap_or_default();

        let mut template = format!(
            "{}{}{}{}",
            t.bos,
            t.system_start,
            self.base.label(&LABELS, "system", &[]),
            t.system_end
        );
        template += &format!(
            "{}{}: \"{}\"\n{}",
            t.input_start,
            name,
            text,
            self.base.label(&LABELS, "inner_thoughts_prompt", &[name])
        );
        template += t.input_end;
        template += t.output_start;
        template += &format!(
            "{{{{GEN inner_thoughts max_tokens={max_new_tokens} stop=[\"\\\"\",\"\\n\"]}}}}"
        );

        PromptTemplate {
            total_tokens: self.count_tokens(&template) + max_new_tokens,
            template,
            variables: TemplateVariables::new(),
        }
    }

    fn complete_response(
        &self,
        _state: &RoleplayState,
        response: &Response,
        variables: &GenerationVariables,
    ) -> Response {
        let Some(thoughts) = variables.get("inner_thoughts") else {
            return response.clone();
        };
        let selected = response.selected_character_id.as_deref();

        let mut response = response.clone();
        for turn in &mut response.characters {
            if Some(turn.character_id.as_str()) == selected {
                turn.inner_thoughts = thoughts.trim().to_string();
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::tokenizer::TiktokenTokenizer;

    fn strategy() -> InnerThoughtsStrategy {
        InnerThoughtsStrategy::new(InstructSlug::Chatml, "en", TiktokenTokenizer::shared().unwrap())
    }

    fn answered_state() -> RoleplayState {
        let mut state = fixtures::single_turn_state();
        state.narration.current_response_id = fixtures::ROOT_RESPONSE_ID.to_string();
        state
    }

    #[test]
    fn test_prompt_quotes_selected_turn() {
        let prompt = strategy().build_guidance_prompt(120, 0, &answered_state());

        assert!(prompt.template.starts_with("<|im_start|>system\nYou are completing the inner thoughts"));
        assert!(prompt.template.contains("<|im_start|>user\nNala: \"Hello... mistress..."));
        assert!(prompt.template.contains("Nala's inner thoughts (first person): \"<|im_end|>"));
        assert!(prompt.template.ends_with(r#"{{GEN inner_thoughts max_tokens=120 stop=["\"","\n"]}}"#));
        assert_eq!(prompt.total_tokens, strategy().count_tokens(&prompt.template) + 120);
    }

    #[test]
    fn test_empty_turn_still_builds() {
        let prompt = strategy().build_guidance_prompt(50, 0, &fixtures::single_turn_state());
        assert!(prompt.template.contains("Nala: \"\"\n"));
    }

    #[test]
    fn test_thoughts_land_on_selected_character() {
        let state = answered_state();
        let response = state.current_response().unwrap().clone();
        let mut snapshot = GenerationVariables::new();
        snapshot.insert("inner_thoughts".to_string(), " I hope she likes me. ".to_string());

        let completed = strategy().complete_response(&state, &response, &snapshot);
        assert_eq!(completed.characters[0].inner_thoughts, "I hope she likes me.");
        assert_eq!(completed.characters[0].text, response.characters[0].text);

        let unchanged = strategy().complete_response(&state, &response, &GenerationVariables::new());
        assert_eq!(unchanged, response);
    }
}

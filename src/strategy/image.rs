//! Image-generation description of the current scene.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::instruct::InstructSlug;
use crate::narration::RoleplayState;
use crate::strategy::{Labels, PromptStrategy, StrategyBase, labels};
use crate::template::{
    GenerationVariables, PromptTemplate, TemplateNames, TemplateVariables, fill_text_template,
    quote_stop,
};
use crate::tokenizer::Tokenizer;

const PROMPT_TOKEN_OFFSET: usize = 30;

const EN: &[(&str, &str)] = &[
    (
        "system_intro",
        "You are an expert visual director. Produce a precise, concise image generation description capturing the current story scene.",
    ),
    (
        "style_rules",
        "Avoid text overlays. Keep it coherent with emotions and setting. Use consistent character appearance.",
    ),
    ("include_scene", "Current scene setting:"),
    ("include_characters", "Characters and visible emotions:"),
    ("include_progress", "Recent story context:"),
    ("description", "Image description:"),
];

const ES: &[(&str, &str)] = &[
    (
        "system_intro",
        "Eres un director visual experto. Escribe una descripción precisa y concisa para generar una imagen de la escena actual.",
    ),
    (
        "style_rules",
        "Evita textos superpuestos. Sé coherente con las emociones y el entorno. Mantén la apariencia de los personajes.",
    ),
    ("include_scene", "Escenario actual:"),
    ("include_characters", "Personajes y emociones visibles:"),
    ("include_progress", "Contexto reciente de la historia:"),
    ("description", "Descripción de la imagen:"),
];

static LABELS: Lazy<Labels> = Lazy::new(|| labels(&[("en", EN), ("es", ES)]));

#[derive(Debug, Clone)]
pub struct ImageGenerationStrategy {
    base: StrategyBase,
}

impl ImageGenerationStrategy {
    pub fn new(instruct: InstructSlug, language: &str, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            base: StrategyBase::new(instruct, language, tokenizer),
        }
    }

    fn label(&self, key: &str) -> String {
        self.base.label(&LABELS, key, &[])
    }
}

impl PromptStrategy for ImageGenerationStrategy {
    type Input = RoleplayState;
    type Output = String;

    fn tokenizer(&self) -> &dyn Tokenizer {
        self.base.tokenizer.as_ref()
    }

    /// `memory_size` bounds the recent chat lines given as story context.
    fn build_guidance_prompt(
        &self,
        max_new_tokens: usize,
        memory_size: usize,
        state: &RoleplayState,
    ) -> PromptTemplate {
        let t = self.base.template();
        let loaded = state.last_loaded_characters();

        let mut template = format!(
            "{}{}{}\n{}{}{}",
            t.bos,
            t.system_start,
            self.label("system_intro"),
            self.label("style_rules"),
            t.system_end,
            t.input_start
        );

        if let Some(scene) = state.current_scene().filter(|scene| !scene.prompt.is_empty()) {
            template += &format!("\n{} {}", self.label("include_scene"), scene.prompt);
        }

        let characters = loaded
            .iter()
            .map(|character| {
                let name = state
                    .character(&character.id)
                    .map(|c| c.name.as_str())
                    .unwrap_or(character.id.as_str());
                if character.emotion.is_empty() {
                    name.to_string()
                } else {
                    format!("{name} ({})", character.emotion)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        if !characters.is_empty() {
            template += &format!("\n{} {}", self.label("include_characters"), characters);
        }

        let mut history: Vec<String> = state
            .chat_history(memory_size)
            .into_iter()
            .map(|message| format!("- {}: {}", message.name, message.text))
            .collect();
        if !history.is_empty() {
            history.reverse();
            template += &format!("\n{}\n{}", self.label("include_progress"), history.join("\n"));
        }

        let stops = std::iter::once("\n")
            .chain(t.stops.iter().copied())
            .map(quote_stop)
            .collect::<Vec<_>>()
            .join(",");
        template += t.input_end;
        template += t.output_start;
        template += &format!(
            "{} {{{{GEN prompt max_tokens={max_new_tokens} stop=[{stops}]}}}}",
            self.label("description")
        );

        let names = TemplateNames {
            user: &state.settings.user.name,
            bot: loaded
                .first()
                .and_then(|character| state.character(&character.id))
                .map(|character| character.name.as_str())
                .unwrap_or_default(),
            characters: state.character_names(),
        };
        let template = fill_text_template(&template, &names);

        PromptTemplate {
            total_tokens: self.count_tokens(&template) + PROMPT_TOKEN_OFFSET,
            template,
            variables: TemplateVariables::new(),
        }
    }

    fn complete_response(
        &self,
        _state: &RoleplayState,
        response: &String,
        variables: &GenerationVariables,
    ) -> String {
        variables
            .get("prompt")
            .map(|prompt| prompt.trim())
            .filter(|prompt| !prompt.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| response.clone())
    }
}

//! Writing-assistant strategies: reply suggestions for the user and
//! suggestions for where the story could go next.
//!
//! Both show the model the chat history as `name: text` lines, newest last.
//! `memory_size` counts messages.

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::instruct::InstructSlug;
use crate::narration::RoleplayState;
use crate::strategy::{Labels, PromptStrategy, StrategyBase, labels};
use crate::template::{
    GenerationVariables, PromptTemplate, TemplateNames, TemplateVariables, fill_text_template,
};
use crate::tokenizer::Tokenizer;

fn personas(state: &RoleplayState) -> String {
    state
        .novel
        .characters
        .iter()
        .filter(|character| !character.description.is_empty())
        .map(|character| {
            let names = TemplateNames {
                user: &state.settings.user.name,
                bot: &character.name,
                characters: state.character_names(),
            };
            fill_text_template(&character.description, &names)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn messages_prompt(state: &RoleplayState, memory_size: usize) -> String {
    let mut lines: Vec<String> = state
        .chat_history(memory_size)
        .into_iter()
        .map(|message| format!("{}: {}", message.name, message.text))
        .collect();
    lines.reverse();
    lines.join("\n")
}

fn slot<'a>(variables: &'a GenerationVariables, key: &str) -> Option<&'a str> {
    variables
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

const REPLY_EN: &[(&str, &str)] = &[
    (
        "writing_assistant_intro",
        "You are a writing assistant that will help you write a story. You suggest replies to a conversation.",
    ),
    ("conversation", "Conversation:"),
    (
        "suggest_replies",
        "Suggest 3 possible Smart/Funny/Flirty replies from % to continue the conversation. They MUST BE ONE SENTENCE EACH.",
    ),
    ("smart_reply", "Smart Reply: %: \"%\""),
    ("funny_reply", "Funny Reply: %: \"%\""),
    ("flirty_reply", "Flirty Reply: %: \"%\""),
];

const REPLY_ES: &[(&str, &str)] = &[
    (
        "writing_assistant_intro",
        "Eres un asistente de escritura que ayudará a escribir una historia. Sugieres respuestas a una conversación.",
    ),
    ("conversation", "Conversación:"),
    (
        "suggest_replies",
        "Sugiere 3 posibles respuestas Inteligentes/Divertidas/Coquetas de % para continuar la conversación. DEBEN SER DE UNA SOLA FRASE CADA UNA.",
    ),
    ("smart_reply", "Respuesta Inteligente: %: \"%\""),
    ("funny_reply", "Respuesta Divertida: %: \"%\""),
    ("flirty_reply", "Respuesta Coqueta: %: \"%\""),
];

static REPLY_LABELS: Lazy<Labels> = Lazy::new(|| labels(&[("en", REPLY_EN), ("es", REPLY_ES)]));

/// Slots filled by [`ResponseSuggestionStrategy`], in output order.
const REPLY_SLOTS: [(&str, &str); 3] = [
    ("smart", "smart_reply"),
    ("funny", "funny_reply"),
    ("flirt", "flirty_reply"),
];

/// Three one-sentence replies the user could send next.
#[derive(Debug, Clone)]
pub struct ResponseSuggestionStrategy {
    base: StrategyBase,
}

impl ResponseSuggestionStrategy {
    pub fn new(instruct: InstructSlug, language: &str, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            base: StrategyBase::new(instruct, language, tokenizer),
        }
    }
}

impl PromptStrategy for ResponseSuggestionStrategy {
    type Input = RoleplayState;
    type Output = Vec<String>;

    fn tokenizer(&self) -> &dyn Tokenizer {
        self.base.tokenizer.as_ref()
    }

    fn build_guidance_prompt(
        &self,
        max_new_tokens: usize,
        memory_size: usize,
        state: &RoleplayState,
    ) -> PromptTemplate {
        let t = self.base.template();
        let user = state.settings.user.name.as_str();
        let label = |key: &str, args: &[&str]| self.base.label(&REPLY_LABELS, key, args);

        let mut template = format!(
            "{}{}{}\n",
            t.bos,
            t.system_start,
            label("writing_assistant_intro", &[])
        );
        template += &format!(
            "\n{}\n{}\n{}",
            personas(state),
            label("conversation", &[]),
            messages_prompt(state, memory_size)
        );
        template += t.system_end;
        template += t.input_start;
        template += &format!("{}\n", label("suggest_replies", &[user]));
        template += t.input_end;
        template += t.output_start;
        for (slot, key) in REPLY_SLOTS {
            let directive =
                format!("{{{{GEN {slot} max_tokens={max_new_tokens} stop=[\"\\\"\",\"\\n\"]}}}}");
            template += &format!("{}\n", label(key, &[user, directive.as_str()]));
        }

        PromptTemplate {
            total_tokens: self.count_tokens(&template) + max_new_tokens * 3,
            template,
            variables: TemplateVariables::new(),
        }
    }

    fn complete_response(
        &self,
        _state: &RoleplayState,
        response: &Vec<String>,
        variables: &GenerationVariables,
    ) -> Vec<String> {
        REPLY_SLOTS
            .iter()
            .enumerate()
            .map(|(index, (slot_name, _))| {
                slot(variables, slot_name)
                    .map(str::to_string)
                    .or_else(|| response.get(index).cloned())
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// One suggested next scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SceneSuggestion {
    /// Short action that leads into the scene.
    pub action_text: String,
    pub music: String,
    /// Narrative description of the scene.
    pub prompt: String,
    /// Background description for an image model.
    pub sd_prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneSuggestionInput {
    pub state: RoleplayState,
    /// When set, a single scene about this action is suggested instead of three.
    pub single_scene_prompt: Option<String>,
}

const SCENE_EN: &[(&str, &str)] = &[
    (
        "scene_suggestion_intro",
        "You're a writing assistant that will suggest possible next scenarios for a story.",
    ),
    (
        "scene_suggestion_instructions",
        "Given an input of the current scene and conversation, you MUST suggest 3 possible next scenes...",
    ),
    (
        "single_scene_instruction",
        "The scene MUST indicate a change in the background, so you MUST describe a different environment.",
    ),
    (
        "multiple_scenes_instruction",
        "Each of the 3 scenes MUST indicate a change in the background, so you MUST describe a different environment.",
    ),
    ("scene_label", "SCENE %"),
    ("background_label", "Background:"),
    ("action_label", "Action:"),
    ("music_label", "Music:"),
    ("description_label", "Description:"),
    ("current_scene", "CURRENT SCENE:"),
    ("conversation", "CONVERSATION:"),
];

const SCENE_ES: &[(&str, &str)] = &[
    (
        "scene_suggestion_intro",
        "Eres un asistente de escritura que sugiere posibles escenarios siguientes para una historia.",
    ),
    (
        "scene_suggestion_instructions",
        "A partir de la escena actual y la conversación, DEBES sugerir 3 posibles escenas siguientes...",
    ),
    (
        "single_scene_instruction",
        "La escena DEBE indicar un cambio de fondo, así que DEBES describir un entorno diferente.",
    ),
    (
        "multiple_scenes_instruction",
        "Cada una de las 3 escenas DEBE indicar un cambio de fondo, así que DEBES describir un entorno diferente.",
    ),
    ("scene_label", "ESCENA %"),
    ("background_label", "Fondo:"),
    ("action_label", "Acción:"),
    ("music_label", "Música:"),
    ("description_label", "Descripción:"),
    ("current_scene", "ESCENA ACTUAL:"),
    ("conversation", "CONVERSACIÓN:"),
];

static SCENE_LABELS: Lazy<Labels> = Lazy::new(|| labels(&[("en", SCENE_EN), ("es", SCENE_ES)]));

const SHOT_INTRO: &str = "Nala is your recently hired maid. She will follow every command from {{user}} and is scared to disappoint {{user}}.\nSCENE: {{user}} and Nala are at the main hall of the mansion.\n";

const SHOT_CONVERSATION: &str = "Nala: Hello... mistress... I am a good maid, you do not have to punish me okay?\n{{user}}: hello, can you help me with a party?\nNala: Oh yes, mistress! I can cook, clean, decorate, and even serve drinks.\n{{user}}: the party is tomorrow night and the people coming are nobles. any ideas?\nNala: We could start with a theme, something elegant like a masquerade ball, with candles and live music.\n{{user}}: very good.";

/// (background, action, music, description) for each example scene.
const SHOT_SCENES: [(&str, &str, &str, &str); 3] = [
    (
        "mansion hall, long table, papers, books, party supplies, afternoon",
        "Plan the party together",
        "uplifting, party, bouncy, grooving",
        "{{user}} and Nala sit down together at a large table, spreading out papers and notes to plan the guest list, menu and decorations.",
    ),
    (
        "kitchen, window, white marble, vegetables, cakes, luxury",
        "Cooking and baking",
        "calm, relaxed, deep",
        "While they cook, Nala begins to open up to {{user}} about her previous master, and {{user}} listens.",
    ),
    (
        "mansion room, tables, chairs, plates, dinner, candles",
        "Practice serving skills",
        "lively, relaxed, bright",
        "{{user}} tests Nala's serving skills, asking her to carry a tray of full glasses around the room without spilling any.",
    ),
];

const SLOT_STOPS: &str = r#"stop=["\"","\n","."]"#;

/// Where the story could go next: three scenes, or one scene about a given
/// action.
#[derive(Debug, Clone)]
pub struct SceneSuggestionStrategy {
    base: StrategyBase,
}

impl SceneSuggestionStrategy {
    pub fn new(instruct: InstructSlug, language: &str, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            base: StrategyBase::new(instruct, language, tokenizer),
        }
    }

    fn label(&self, key: &str, args: &[&str]) -> String {
        self.base.label(&SCENE_LABELS, key, args)
    }

    fn example_answer(&self, single: bool) -> String {
        if single {
            let (background, action, music, description) = SHOT_SCENES[0];
            return format!(
                "\n{}: \"{}\"\n  {} \"{}\"\n  {} \"{}\"\n  {} \"{}\"\n",
                self.label("scene_label", &["ABOUT"]),
                action,
                self.label("background_label", &[]),
                background,
                self.label("music_label", &[]),
                music,
                self.label("description_label", &[]),
                description
            );
        }

        let mut answer = String::from("\n");
        for (index, (background, action, music, description)) in SHOT_SCENES.iter().enumerate() {
            answer += &format!(
                "{}\n  {} \"{}\"\n  {} \"{}\"\n  {} \"{}\"\n  {} \"{}\"\n",
                self.label("scene_label", &[&(index + 1).to_string()]),
                self.label("background_label", &[]),
                background,
                self.label("action_label", &[]),
                action,
                self.label("music_label", &[]),
                music,
                self.label("description_label", &[]),
                description
            );
        }
        answer
    }

    fn scene_slots(&self, index: usize, with_action: bool) -> String {
        let mut slots = format!(
            "  {} \"{{{{GEN place_{index} max_tokens=50 {SLOT_STOPS}}}}}\"\n",
            self.label("background_label", &[])
        );
        if with_action {
            slots += &format!(
                "  {} \"{{{{GEN action_{index} max_tokens=15 {SLOT_STOPS}}}}}\"\n",
                self.label("action_label", &[])
            );
        }
        slots += &format!(
            "  {} \"{{{{GEN music_{index} max_tokens=10 {SLOT_STOPS}}}}}\"\n",
            self.label("music_label", &[])
        );
        slots += &format!(
            "  {} \"{{{{GEN desc_{index} max_tokens=150 {SLOT_STOPS}}}}}\"\n",
            self.label("description_label", &[])
        );
        slots
    }
}

impl PromptStrategy for SceneSuggestionStrategy {
    type Input = SceneSuggestionInput;
    type Output = Vec<SceneSuggestion>;

    fn tokenizer(&self) -> &dyn Tokenizer {
        self.base.tokenizer.as_ref()
    }

    fn build_guidance_prompt(
        &self,
        max_new_tokens: usize,
        memory_size: usize,
        input: &SceneSuggestionInput,
    ) -> PromptTemplate {
        let t = self.base.template();
        let state = &input.state;
        let single = input.single_scene_prompt.as_deref();

        let mut template = format!(
            "{}{}{}\n{}\n",
            t.bos,
            t.system_start,
            self.label("scene_suggestion_intro", &[]),
            self.label("scene_suggestion_instructions", &[])
        );
        template += &format!(
            "{}\n",
            if single.is_some() {
                self.label("single_scene_instruction", &[])
            } else {
                self.label("multiple_scenes_instruction", &[])
            }
        );

        template += t.system_end;
        template += t.input_start;
        template += SHOT_INTRO;
        template += SHOT_CONVERSATION;
        template += t.input_end;
        template += t.output_start;
        template += &self.example_answer(single.is_some());
        template += t.output_end;
        template += t.input_start;

        template += &format!("{}\n", personas(state));
        if let Some(scene) = state.current_scene().filter(|scene| !scene.prompt.is_empty()) {
            template += &format!("{}\n{}\n", self.label("current_scene", &[]), scene.prompt);
        }
        template += &format!(
            "{}\n{}\n",
            self.label("conversation", &[]),
            messages_prompt(state, memory_size)
        );
        template += t.input_end;
        template += t.output_start;
        template += "\n";

        match single {
            Some(action) => {
                template += &format!("{}: {}\n", self.label("scene_label", &["ABOUT"]), action);
                template += &self.scene_slots(1, false);
            }
            None => {
                for index in 1..=3 {
                    template += &format!("{}:\n", self.label("scene_label", &[&index.to_string()]));
                    template += &self.scene_slots(index, true);
                }
            }
        }

        let scene_characters: Vec<_> = state
            .current_scene()
            .map(|scene| {
                scene
                    .characters
                    .iter()
                    .filter_map(|member| state.character(&member.character_id))
                    .collect()
            })
            .unwrap_or_default();
        let names = TemplateNames {
            user: &state.settings.user.name,
            bot: scene_characters
                .first()
                .map(|character| character.name.as_str())
                .unwrap_or_default(),
            characters: scene_characters
                .iter()
                .map(|character| (character.id.clone(), character.name.clone()))
                .collect(),
        };
        let template = fill_text_template(&template, &names);

        PromptTemplate {
            total_tokens: self.count_tokens(&template) + max_new_tokens * 3,
            template,
            variables: TemplateVariables::new(),
        }
    }

    fn complete_response(
        &self,
        input: &SceneSuggestionInput,
        response: &Vec<SceneSuggestion>,
        variables: &GenerationVariables,
    ) -> Vec<SceneSuggestion> {
        let count = if input.single_scene_prompt.is_some() { 1 } else { 3 };

        (1..=count)
            .map(|index| {
                let existing = response.get(index - 1).cloned().unwrap_or_default();
                let pick = |key: &str, fallback: String| {
                    slot(variables, &format!("{key}_{index}"))
                        .map(str::to_string)
                        .unwrap_or(fallback)
                };
                let action_text = match &input.single_scene_prompt {
                    Some(action) => action.clone(),
                    None => pick("action", existing.action_text),
                };
                SceneSuggestion {
                    action_text,
                    music: pick("music", existing.music),
                    prompt: pick("desc", existing.prompt),
                    sd_prompt: pick("place", existing.sd_prompt),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::tokenizer::TiktokenTokenizer;

    fn tokenizer() -> Arc<dyn Tokenizer> {
        TiktokenTokenizer::shared().unwrap()
    }

    #[test]
    fn test_reply_prompt_has_three_slots() {
        let strategy = ResponseSuggestionStrategy::new(InstructSlug::Alpaca, "en", tokenizer());
        let prompt = strategy.build_guidance_prompt(40, 10, &fixtures::single_turn_state());

        assert!(prompt.template.contains("Nala is your recently hired maid"));
        assert!(prompt.template.contains("replies from Anon to continue"));
        assert!(prompt.template.contains("Anon: good morning nala."));
        assert!(prompt.template.contains(r#"Smart Reply: Anon: "{{GEN smart max_tokens=40 stop=["\"","\n"]}}""#));
        assert!(prompt.template.contains("{{GEN funny max_tokens=40"));
        assert!(prompt.template.contains("{{GEN flirt max_tokens=40"));
        assert_eq!(
            prompt.total_tokens,
            strategy.count_tokens(&prompt.template) + 40 * 3
        );
    }

    #[test]
    fn test_reply_history_is_chronological_and_bounded() {
        let strategy = ResponseSuggestionStrategy::new(InstructSlug::Alpaca, "en", tokenizer());
        let state = fixtures::single_turn_state();

        let full = strategy.build_guidance_prompt(40, 10, &state).template;
        let greeting = full.find("Nala: Hello... mistress").unwrap();
        let query = full.find("Anon: good morning nala.").unwrap();
        assert!(greeting < query);

        let short = strategy.build_guidance_prompt(40, 1, &state).template;
        assert!(short.contains("Anon: good morning nala."));
        assert!(!short.contains("Nala: Hello... mistress"));
    }

    #[test]
    fn test_reply_merge_keeps_previous_values() {
        let strategy = ResponseSuggestionStrategy::new(InstructSlug::Alpaca, "en", tokenizer());
        let state = fixtures::single_turn_state();
        let mut snapshot = GenerationVariables::new();
        snapshot.insert("smart".to_string(), " Shall we begin?".to_string());

        let first = strategy.complete_response(&state, &Vec::new(), &snapshot);
        assert_eq!(first, vec!["Shall we begin?", "", ""]);

        snapshot.insert("funny".to_string(), "Is that a feather duster or a sword?".to_string());
        let second = strategy.complete_response(&state, &first, &snapshot);
        assert_eq!(second[1], "Is that a feather duster or a sword?");
        assert_eq!(strategy.complete_response(&state, &first, &snapshot), second);
    }

    #[test]
    fn test_scene_prompt_for_three_scenes() {
        let strategy = SceneSuggestionStrategy::new(InstructSlug::Chatml, "en", tokenizer());
        let input = SceneSuggestionInput {
            state: fixtures::single_turn_state(),
            single_scene_prompt: None,
        };
        let prompt = strategy.build_guidance_prompt(100, 10, &input);

        for index in 1..=3 {
            assert!(prompt.template.contains(&format!("{{{{GEN place_{index} max_tokens=50")));
            assert!(prompt.template.contains(&format!("{{{{GEN action_{index} max_tokens=15")));
            assert!(prompt.template.contains(&format!("{{{{GEN desc_{index} max_tokens=150")));
        }
        assert!(prompt.template.contains("CURRENT SCENE:\nNala waits in the main hall"));
        assert!(prompt.template.contains("Anon: hello, can you help me with a party?"));
        assert!(!prompt.template.contains("{{user}}"));
    }

    #[test]
    fn test_scene_prompt_for_single_scene() {
        let strategy = SceneSuggestionStrategy::new(InstructSlug::Chatml, "en", tokenizer());
        let input = SceneSuggestionInput {
            state: fixtures::single_turn_state(),
            single_scene_prompt: Some("go to the market".to_string()),
        };
        let prompt = strategy.build_guidance_prompt(100, 10, &input);

        assert!(prompt.template.contains("SCENE ABOUT: go to the market\n"));
        assert!(prompt.template.contains("{{GEN place_1"));
        assert!(!prompt.template.contains("{{GEN action_1"));
        assert!(!prompt.template.contains("{{GEN place_2"));
    }

    #[test]
    fn test_scene_merge() {
        let strategy = SceneSuggestionStrategy::new(InstructSlug::Chatml, "en", tokenizer());
        let mut snapshot = GenerationVariables::new();
        snapshot.insert("place_1".to_string(), "market square, stalls".to_string());
        snapshot.insert("music_1".to_string(), "busy".to_string());
        snapshot.insert("desc_2".to_string(), "Nala gets lost.".to_string());

        let three = strategy.complete_response(
            &SceneSuggestionInput {
                state: fixtures::single_turn_state(),
                single_scene_prompt: None,
            },
            &Vec::new(),
            &snapshot,
        );
        assert_eq!(three.len(), 3);
        assert_eq!(three[0].sd_prompt, "market square, stalls");
        assert_eq!(three[1].prompt, "Nala gets lost.");
        assert_eq!(three[2], SceneSuggestion::default());

        let single = strategy.complete_response(
            &SceneSuggestionInput {
                state: fixtures::single_turn_state(),
                single_scene_prompt: Some("go to the market".to_string()),
            },
            &Vec::new(),
            &snapshot,
        );
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].action_text, "go to the market");
        assert_eq!(single[0].music, "busy");
    }
}

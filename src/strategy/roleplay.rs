//! # Roleplay response strategy
//!
//! Builds the prompt for the next turn of one character and folds the
//! streamed `emotion`, `text`, `reasoning` and indicator slots back into a
//! [`Response`].
//!
//! A built template has three parts:
//!
//! 1. **Context**: system instructions, persona and attributes, outfits,
//!    example dialogue, matching lorebook entries, the participants line, the
//!    scene prompt, objectives and indicator rules.
//! 2. **History**: up to `memory_size` dialogue nodes from the active path,
//!    rendered as alternating instruction and response segments.
//! 3. **Ask line**: the response marker, optional `<think>` block, indicator
//!    slots, the reaction selector and the text generation slot.
//!
//! History is the only part that depends on `memory_size`, and it only grows
//! by prepending older nodes, so the token estimate is monotonic in
//! `memory_size`.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::instruct::{InstructSlug, RoleplayMarkers};
use crate::lorebook::{active_lorebooks, find_lorebook_entries};
use crate::narration::{
    BASE_EMOTIONS, CharacterResponse, Dialogue, Indicator, IndicatorKind, IndicatorValue,
    Response, RoleplayState,
};
use crate::strategy::{Labels, PromptStrategy, StrategyBase, labels};
use crate::template::{
    GenerationVariables, PromptTemplate, TemplateNames, TemplateVariable, TemplateVariables,
    fill_generated, fill_text_template, parse_llm_response, quote_stop,
};
use crate::tokenizer::Tokenizer;

const PROMPT_TOKEN_OFFSET: usize = 50;

/// Lorebook entries injected into one prompt.
const MAX_LOREBOOK_ENTRIES: usize = 3;

const EN: &[(&str, &str)] = &[
    (
        "system_prompt",
        "You are an expert actor that can fully immerse yourself into any role given.",
    ),
    (
        "current_role",
        "You do not break character for any reason, even if someone tries addressing you as an AI or language model. Currently your role is %, which is described in detail below. As %, continue the exchange with %.",
    ),
    (
        "avoid_repetition",
        "Avoid repetition, don't loop. Develop the plot slowly, always stay in character.",
    ),
    (
        "do_not_describe_user_actions",
        "Do not write %'s actions or dialogue. Only write what % says and does.",
    ),
    (
        "must_indicate_reaction",
        "You must also indicate %'s reaction in the response.",
    ),
    (
        "must_not_repeat_reactions",
        "You MUST not repeat the same reaction too many times.",
    ),
    ("reaction_must_be_one_of", "The reaction MUST be one of: %."),
    ("character_outfit_description", "%'s outfit: %"),
    ("character_speech_example", "This is how % should talk:"),
    (
        "roleplay_chat_begins",
        "Then the roleplay chat between % begins. Respond as %.",
    ),
    ("current_scene", "CURRENT SCENE:"),
    ("character_objective", "%'s objective:"),
    ("current_indicators", "CURRENT INDICATORS:"),
    ("indicator_percentage", "% MUST be a percentage between 0 and 100."),
    ("indicator_amount", "% MUST be an amount between % and %."),
    ("indicator_discrete", "% MUST be one of the following: %."),
    (
        "reaction_instruction",
        "Respond with the reaction first, then the text.",
    ),
    ("character_reaction", "%'s reaction"),
    ("think_reaction", "Okay, the reaction that % will show is"),
    (
        "has_condition_happened",
        "In the current roleplay, has the following thing happened?",
    ),
    (
        "based_on_last_two_messages",
        "Based on the last two messages, the answer is:",
    ),
];

const ES: &[(&str, &str)] = &[
    (
        "system_prompt",
        "Eres un actor experto que puede sumergirse por completo en cualquier papel.",
    ),
    (
        "current_role",
        "No rompes el personaje por ningún motivo, aunque alguien te trate como una IA o un modelo de lenguaje. Tu papel actual es %, descrito en detalle a continuación. Como %, continúa la conversación con %.",
    ),
    (
        "avoid_repetition",
        "Evita la repetición. Desarrolla la trama despacio y mantente siempre en el personaje.",
    ),
    (
        "do_not_describe_user_actions",
        "No escribas las acciones ni el diálogo de %. Solo escribe lo que % dice y hace.",
    ),
    (
        "must_indicate_reaction",
        "También debes indicar la reacción de % en la respuesta.",
    ),
    (
        "must_not_repeat_reactions",
        "NO debes repetir la misma reacción demasiadas veces.",
    ),
    ("reaction_must_be_one_of", "La reacción DEBE ser una de: %."),
    ("character_outfit_description", "Vestimenta de %: %"),
    ("character_speech_example", "Así es como habla %:"),
    (
        "roleplay_chat_begins",
        "Entonces comienza el chat de rol entre %. Responde como %.",
    ),
    ("current_scene", "ESCENA ACTUAL:"),
    ("character_objective", "Objetivo de %:"),
    ("current_indicators", "INDICADORES ACTUALES:"),
    ("indicator_percentage", "% DEBE ser un porcentaje entre 0 y 100."),
    ("indicator_amount", "% DEBE ser una cantidad entre % y %."),
    ("indicator_discrete", "% DEBE ser uno de los siguientes: %."),
    (
        "reaction_instruction",
        "Responde primero con la reacción y luego con el texto.",
    ),
    // Stop markers and history use the English form.
    ("character_reaction", "%'s reaction"),
    ("think_reaction", "Bien, la reacción que mostrará % es"),
    (
        "has_condition_happened",
        "En el rol actual, ¿ocurrió lo siguiente?",
    ),
    (
        "based_on_last_two_messages",
        "Según los últimos dos mensajes, la respuesta es:",
    ),
];

static LABELS: Lazy<Labels> = Lazy::new(|| labels(&[("en", EN), ("es", ES)]));

static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\W+").expect("non-word pattern is valid"));

/// Slot name for an indicator: non-word runs become `_`, lowercased.
pub fn indicator_var_name(name: &str) -> String {
    NON_WORD.replace_all(name, "_").to_lowercase()
}

/// `snapshot` with the current turn's existing text in front of the generated
/// `text`. The ask line ends with that text, so the model continues it; the
/// raw snapshot stays the one to write back into the template.
pub fn continue_existing_text(
    input: &RoleplayInput,
    snapshot: &GenerationVariables,
) -> GenerationVariables {
    let existing = input
        .state
        .current_response()
        .and_then(|response| response.character(&input.current_character_id))
        .map(|turn| turn.text.as_str())
        .unwrap_or_default();
    let mut continued = snapshot.clone();
    if let Some(text) = continued.get_mut("text") {
        text.insert_str(0, existing);
    }
    continued
}

/// Input for one roleplay generation.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleplayInput {
    pub state: RoleplayState,
    pub current_character_id: String,
}

#[derive(Debug, Clone)]
pub struct RoleplayStrategy {
    base: StrategyBase,
    reasoning: bool,
}

impl RoleplayStrategy {
    pub fn new(instruct: InstructSlug, language: &str, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            base: StrategyBase::new(instruct, language, tokenizer),
            reasoning: instruct.has_reasoning(),
        }
    }

    /// Whether the model answers after a `<think>` block.
    pub fn with_reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn markers(&self) -> RoleplayMarkers {
        self.base.template().roleplay_markers()
    }

    fn label(&self, key: &str, args: &[&str]) -> String {
        self.base.label(&LABELS, key, args)
    }

    fn names<'a>(&self, state: &'a RoleplayState, character_id: &str) -> TemplateNames<'a> {
        TemplateNames {
            user: &state.settings.user.name,
            bot: state
                .character(character_id)
                .map(|c| c.name.as_str())
                .unwrap_or_default(),
            characters: state.character_names(),
        }
    }

    fn emotions(&self, state: &RoleplayState, character_id: &str) -> Vec<String> {
        state
            .character(character_id)
            .map(|c| c.emotions.clone())
            .filter(|emotions| !emotions.is_empty())
            .unwrap_or_else(|| BASE_EMOTIONS.iter().map(|e| e.to_string()).collect())
    }

    fn indicator_rule(&self, indicator: &Indicator) -> String {
        match indicator.kind {
            IndicatorKind::Percentage => self.label("indicator_percentage", &[&indicator.name]),
            IndicatorKind::Amount => self.label(
                "indicator_amount",
                &[
                    &indicator.name,
                    &indicator.min.to_string(),
                    &indicator.max.to_string(),
                ],
            ),
            IndicatorKind::Discrete => self.label(
                "indicator_discrete",
                &[&indicator.name, &indicator.values.join(", ")],
            ),
        }
    }

    fn context_prompt(&self, state: &RoleplayState, character_id: &str) -> String {
        let t = self.base.template();
        let scene = state.current_scene();
        let character = state.character(character_id).cloned().unwrap_or_default();
        let attributes = character
            .attributes()
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        let emotions = self.emotions(state, character_id).join(", ");

        let mut template = format!("{}{}{} ", t.bos, t.system_start, self.label("system_prompt", &[]));
        template += &self.label("current_role", &["{{char}}", "{{char}}", "{{user}}"]);
        template += &format!("\n{}", self.label("avoid_repetition", &[]));
        template += &format!(
            "\n{}",
            self.label("do_not_describe_user_actions", &["{{user}}", "{{char}}"])
        );
        template += &format!("\n{}", self.label("must_indicate_reaction", &["{{char}}"]));
        template += &format!("\n{}", self.label("must_not_repeat_reactions", &[]));
        template += &format!("\n{}", self.label("reaction_must_be_one_of", &[&emotions]));
        template += t.system_end;
        template += t.input_start;

        if !character.description.is_empty() || !attributes.is_empty() {
            template += &format!("{}\n{}\n", character.description, attributes);
        }

        if !state.settings.prompt.system_prompt.is_empty() {
            template += &format!("{}\n", state.settings.prompt.system_prompt);
        }

        for scene_character in scene.map(|s| s.characters.as_slice()).unwrap_or_default() {
            let Some(member) = state.character(&scene_character.character_id) else {
                continue;
            };
            if let Some(outfit) = member.outfit_description.as_deref().filter(|o| !o.is_empty()) {
                template += &format!(
                    "\n{}\n",
                    self.label("character_outfit_description", &[&member.name, outfit])
                );
            }
        }

        let sample_chat = character.sample_chat();
        let lorebook = self.lorebook_context(state, character_id);
        if !sample_chat.is_empty() || !lorebook.is_empty() {
            template += &format!("\n{}\n", self.label("character_speech_example", &["{{char}}"]));
            for example in &sample_chat {
                template += example;
                template += "\n";
            }
            if !lorebook.is_empty() {
                template += &format!("{lorebook}\n");
            }
        }

        let mut participants: Vec<String> = scene
            .map(|s| {
                s.characters
                    .iter()
                    .filter(|c| c.character_id != character_id)
                    .map(|c| format!("{{{{{}}}}}", c.character_id))
                    .collect()
            })
            .unwrap_or_default();
        participants.push("{{user}}".to_string());
        template += &format!(
            "\n{}\n",
            self.label("roleplay_chat_begins", &[&participants.join(", "), "{{char}}"])
        );

        if let Some(scene) = scene {
            if !scene.prompt.is_empty() {
                template += &format!("{} {}\n", self.label("current_scene", &[]), scene.prompt);
            }

            for member in &scene.characters {
                if let Some(objective) = member.objective.as_deref().filter(|o| !o.is_empty()) {
                    let placeholder = format!("{{{{{}}}}}", member.character_id);
                    template += &format!(
                        "\n{} {}\n",
                        self.label("character_objective", &[&placeholder]),
                        objective
                    );
                }
            }

            if !scene.indicators.is_empty() {
                template += &format!("\n{}", self.label("current_indicators", &[]));
                for indicator in &scene.indicators {
                    template += &format!(
                        "\n{}: {} {}",
                        indicator.name,
                        indicator.description,
                        self.indicator_rule(indicator)
                    );
                }
                template += "\n";
            }
        }

        template
    }

    /// Up to three lorebook entries triggered by the messages just before the
    /// current response.
    fn lorebook_context(&self, state: &RoleplayState, character_id: &str) -> String {
        let lorebooks = active_lorebooks(state);
        if lorebooks.is_empty() {
            return String::new();
        }

        let names = self.names(state, character_id);
        let messages: Vec<String> = state
            .parent_dialogues_with_characters(&[character_id], 4)
            .into_iter()
            .skip(1)
            .rev()
            .flat_map(|dialogue| match dialogue {
                Dialogue::Response(response) => response
                    .characters
                    .iter()
                    .map(|turn| fill_text_template(&turn.text, &names))
                    .collect::<Vec<_>>(),
                Dialogue::Interaction(interaction) => {
                    vec![fill_text_template(&interaction.query, &names)]
                }
            })
            .collect();

        let entries: Vec<_> = lorebooks
            .iter()
            .flat_map(|lorebook| lorebook.entries.iter().cloned())
            .collect();

        find_lorebook_entries(&messages, &entries)
            .into_iter()
            .take(MAX_LOREBOOK_ENTRIES)
            .map(|entry| entry.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn history_prompt(&self, state: &RoleplayState, memory_size: usize, character_id: &str) -> String {
        let dialogues = state.parent_dialogues_with_characters(&[character_id], memory_size);
        let markers = self.markers();
        let mut prompt = String::new();
        let mut scene_id: Option<&str> = None;

        for dialogue in dialogues.iter().rev() {
            // Responses other than starts stay in the scene of the turn before.
            let dialogue_scene = match dialogue {
                Dialogue::Interaction(interaction) => Some(interaction.scene_id.as_str()),
                Dialogue::Response(response) => state
                    .novel
                    .starts
                    .iter()
                    .find(|start| start.id == response.id)
                    .map(|start| start.scene_id.as_str()),
            }
            .filter(|id| !id.is_empty())
            .or(scene_id);

            if dialogue_scene != scene_id {
                let cutscene = dialogue_scene
                    .and_then(|id| state.scene(id))
                    .and_then(|scene| scene.cut_scene.as_ref())
                    .map(|cut_scene| cut_scene.id.as_str());
                prompt += &self.cutscene_segment(state, cutscene, &markers);
                scene_id = dialogue_scene;
            }

            if let Dialogue::Interaction(interaction) = dialogue {
                if let Some(after) = &interaction.after_battle {
                    let cutscene = state.battle(&after.battle_id).and_then(|battle| {
                        if after.is_win {
                            battle.win_cutscene_id.as_deref()
                        } else {
                            battle.loss_cutscene_id.as_deref()
                        }
                    });
                    prompt += &self.cutscene_segment(state, cutscene, &markers);
                }
            }

            let line = match dialogue {
                Dialogue::Interaction(interaction) => {
                    let prefix = if interaction.query.starts_with("OOC:") {
                        ""
                    } else {
                        "{{user}}: "
                    };
                    if self.needs_instruction_marker(&prompt, &markers) {
                        format!("{}{}{}\n", markers.instruction, prefix, interaction.query)
                    } else {
                        format!("{}{}\n", prefix, interaction.query)
                    }
                }
                Dialogue::Response(response) => {
                    let indicators = state
                        .scene_of_response(response)
                        .map(|scene| scene.indicators.as_slice())
                        .unwrap_or_default();
                    let is_current = response.id == state.narration.current_response_id;
                    self.response_lines(response, character_id, indicators, is_current)
                }
            };
            prompt += &line;

            if let Dialogue::Response(response) = dialogue {
                if let Some(battle) = response
                    .battle_start_id
                    .as_deref()
                    .and_then(|id| state.battle(id))
                {
                    if let Some(battle_prompt) = battle.prompt.as_deref().filter(|p| !p.is_empty()) {
                        prompt += &format!("{}*{}*\n", markers.response, battle_prompt);
                    }
                    prompt += &self.cutscene_segment(
                        state,
                        battle.intro_cutscene_id.as_deref(),
                        &markers,
                    );
                }
            }
        }

        prompt
    }

    /// A cutscene rendered as its own response segment, or nothing when the
    /// id is unknown or the cutscene is empty.
    fn cutscene_segment(
        &self,
        state: &RoleplayState,
        cutscene_id: Option<&str>,
        markers: &RoleplayMarkers,
    ) -> String {
        cutscene_id
            .and_then(|id| state.cutscene(id))
            .and_then(|cutscene| cutscene.prompt())
            .map(|text| format!("{}{}\n", markers.response, text))
            .unwrap_or_default()
    }

    /// A user turn opens a new instruction segment only when the transcript
    /// so far ends inside a response segment.
    fn needs_instruction_marker(&self, text: &str, markers: &RoleplayMarkers) -> bool {
        match (text.rfind(&markers.instruction), text.rfind(&markers.response)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(instruction), Some(response)) => instruction < response,
        }
    }

    fn response_lines(
        &self,
        response: &Response,
        character_id: &str,
        indicators: &[Indicator],
        is_current: bool,
    ) -> String {
        let markers = self.markers();
        let index = response
            .characters
            .iter()
            .position(|turn| turn.character_id == character_id);
        let plain = |turns: &[CharacterResponse]| {
            turns
                .iter()
                .map(|turn| format!("{{{{{}}}}}: {}", turn.character_id, turn.text))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let (prev, current, next) = match index {
            Some(i) => (
                plain(&response.characters[..i]),
                Some(&response.characters[i]),
                plain(&response.characters[i + 1..]),
            ),
            None => (plain(&response.characters), None, String::new()),
        };

        // The current character's own turn in the current response is
        // written by the ask line.
        if is_current {
            return if prev.is_empty() { prev } else { format!("{prev}\n") };
        }

        let indicator_lines: String = response
            .indicators
            .iter()
            .filter_map(|value| {
                indicators
                    .iter()
                    .find(|indicator| indicator.id == value.id)
                    .map(|indicator| format!("{}: {}{}\n", indicator.name, value.value, indicator.unit()))
            })
            .collect();
        let indicator_block = if indicator_lines.is_empty() {
            String::new()
        } else {
            format!("{indicator_lines}\n")
        };
        let current_text = current.map(|turn| turn.text.as_str()).unwrap_or_default();
        let next_block = if next.is_empty() {
            String::new()
        } else {
            format!("{}{}\n", markers.instruction, next)
        };

        if response.parent_interaction_id.is_some() {
            let mut out = if prev.is_empty() { String::new() } else { format!("{prev}\n") };
            if !current_text.is_empty() {
                let emotion = current.map(|turn| turn.emotion.as_str()).unwrap_or_default();
                out += &markers.response;
                out += &indicator_block;
                out += &format!(
                    "{}: {}\n{{{{char}}}}: {}\n",
                    self.label("character_reaction", &["{{char}}"]),
                    emotion,
                    current_text
                );
            }
            out + &next_block
        } else {
            let mut out = if prev.is_empty() {
                String::new()
            } else {
                format!("{}{}\n", markers.instruction, prev)
            };
            if !current_text.is_empty() {
                out += &markers.response;
                out += &indicator_block;
                out += &format!("{{{{char}}}}: {current_text}\n");
            }
            out += "\n";
            out + &next_block
        }
    }

    fn ask_line(&self, state: &RoleplayState, max_new_tokens: usize, character_id: &str) -> String {
        let t = self.base.template();
        let markers = self.markers();
        let current_response = state.current_response();
        let turn = current_response.and_then(|response| response.character(character_id));
        let scene = state.current_scene();

        let existing_indicators: &[IndicatorValue] = current_response
            .map(|response| response.indicators.as_slice())
            .unwrap_or_default();
        let existing_emotion = turn.map(|t| t.emotion.as_str()).unwrap_or_default();
        let existing_text = turn.map(|t| t.text.as_str()).unwrap_or_default();

        let mut stops = vec![format!("\n{}:", state.settings.user.name)];
        for member in scene.map(|s| s.characters.as_slice()).unwrap_or_default() {
            let name = state
                .character(&member.character_id)
                .map(|c| c.name.as_str())
                .unwrap_or_default();
            stops.push(format!("\n{name}:"));
            stops.push(format!("\n{name}'s reaction:"));
            stops.push("# ".to_string());
        }
        stops.extend(t.stops.iter().map(|stop| stop.to_string()));
        let stops = stops
            .iter()
            .map(|stop| quote_stop(stop))
            .collect::<Vec<_>>()
            .join(",");

        let reaction = if existing_emotion.is_empty() {
            "{{SEL emotion options=emotions}}".to_string()
        } else {
            format!(" {existing_emotion}")
        };

        let mut line = markers.ask_line;
        let mut already_reacted = false;

        if self.reasoning {
            if state.settings.prompt.reasoning_enabled {
                line += &format!(
                    "<think>\n{}{}. So,{{{{GEN reasoning max_tokens=512 stop=[\"</think>\"]}}}}</think>\n",
                    self.label("think_reaction", &["{{char}}"]),
                    reaction
                );
                already_reacted = true;
            } else {
                line += "<think></think>\n";
            }
        }

        line += &format!("{}\n", self.label("reaction_instruction", &[]));

        for indicator in scene.map(|s| s.indicators.as_slice()).unwrap_or_default() {
            let var = indicator_var_name(&indicator.name);
            if let Some(existing) = existing_indicators.iter().find(|v| v.id == indicator.id) {
                line += &format!("{}: {}{}\n", indicator.name, existing.value, indicator.unit());
            } else if indicator.inferred
                && matches!(indicator.kind, IndicatorKind::Percentage | IndicatorKind::Amount)
            {
                line += &format!(
                    "{}: {{{{GEN {var} max_tokens=3 stop=[\"%\"]}}}}\n",
                    indicator.name
                );
            } else if indicator.kind == IndicatorKind::Discrete {
                line += &format!(
                    "{}: {{{{SEL {var} options={var}_options}}}}\n",
                    indicator.name
                );
            }
        }

        if !already_reacted {
            line += &format!(
                "{}:{}\n",
                self.label("character_reaction", &["{{char}}"]),
                reaction
            );
        }

        line += &format!(
            "{{{{char}}}}:{existing_text}{{{{GEN text max_tokens={max_new_tokens} stop=[{stops}]}}}}"
        );
        line
    }

    /// A Yes/No check appended to an already generated turn.
    ///
    /// `prompt` is the template the turn was generated from and `snapshot` the
    /// final generation slots; the slots are written back into the template
    /// before the question is asked.
    pub fn build_condition_prompt(
        &self,
        input: &RoleplayInput,
        prompt: &PromptTemplate,
        snapshot: &GenerationVariables,
        condition: &str,
    ) -> PromptTemplate {
        let markers = self.markers();
        let mut template = fill_generated(&prompt.template, snapshot);
        template += &format!(
            "\n{}OOC: {}: {}\nAnswer with Yes or No\n{}{}{{{{SEL cond options=cond_opt}}}}",
            markers.instruction,
            self.label("has_condition_happened", &[]),
            condition,
            markers.response,
            self.label("based_on_last_two_messages", &[]),
        );
        let template = fill_text_template(
            &template,
            &self.names(&input.state, &input.current_character_id),
        );

        let mut variables = TemplateVariables::new();
        variables.insert(
            "cond_opt".to_string(),
            TemplateVariable::Options(vec![" Yes".to_string(), " No".to_string()]),
        );

        PromptTemplate {
            total_tokens: self.count_tokens(&template),
            template,
            variables,
        }
    }
}

impl PromptStrategy for RoleplayStrategy {
    type Input = RoleplayInput;
    type Output = Response;

    fn tokenizer(&self) -> &dyn Tokenizer {
        self.base.tokenizer.as_ref()
    }

    fn build_guidance_prompt(
        &self,
        max_new_tokens: usize,
        memory_size: usize,
        input: &RoleplayInput,
    ) -> PromptTemplate {
        let state = &input.state;
        let character_id = input.current_character_id.as_str();

        let mut template = self.context_prompt(state, character_id);
        template += &self.history_prompt(state, memory_size, character_id);
        template += &self.ask_line(state, max_new_tokens, character_id);
        let template = fill_text_template(&template, &self.names(state, character_id));

        let total_tokens = self.count_tokens(&template) + PROMPT_TOKEN_OFFSET;

        let parent_emotion = state
            .last_loaded_characters()
            .into_iter()
            .find(|loaded| loaded.id == character_id)
            .map(|loaded| loaded.emotion)
            .unwrap_or_default();
        let emotions = self.emotions(state, character_id);
        let keep_all = emotions.len() <= 1;

        let mut variables = TemplateVariables::new();
        variables.insert(
            "scene_opt".to_string(),
            TemplateVariable::Options(vec![" Yes".to_string(), " No".to_string()]),
        );
        variables.insert(
            "cond_opt".to_string(),
            TemplateVariable::Options((0..10).map(|i| format!(" {i}")).collect()),
        );
        variables.insert(
            "emotions".to_string(),
            TemplateVariable::Options(
                emotions
                    .iter()
                    .filter(|emotion| keep_all || **emotion != parent_emotion)
                    .map(|emotion| format!(" {emotion}"))
                    .collect(),
            ),
        );

        if let Some(scene) = state.current_scene() {
            for indicator in &scene.indicators {
                if indicator.kind == IndicatorKind::Discrete {
                    variables.insert(
                        format!("{}_options", indicator_var_name(&indicator.name)),
                        TemplateVariable::Options(
                            indicator.values.iter().map(|v| format!(" {v}")).collect(),
                        ),
                    );
                }
            }
        }

        debug!(memory_size, total_tokens, "Built roleplay prompt");

        PromptTemplate {
            template,
            variables,
            total_tokens,
        }
    }

    fn complete_response(
        &self,
        input: &RoleplayInput,
        response: &Response,
        variables: &GenerationVariables,
    ) -> Response {
        let state = &input.state;
        let character_id = input.current_character_id.as_str();
        let name = state
            .character(character_id)
            .map(|c| c.name.as_str())
            .unwrap_or_default();
        let slot = |key: &str| {
            variables
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let mut turn = response.character(character_id).cloned().unwrap_or_else(|| {
            CharacterResponse {
                character_id: character_id.to_string(),
                ..Default::default()
            }
        });
        if let Some(emotion) = slot("emotion") {
            turn.emotion = emotion.to_string();
        }
        if let Some(text) = slot("text") {
            turn.text = parse_llm_response(text, name);
        }
        if let Some(reasoning) = slot("reasoning") {
            turn.reasoning = reasoning.to_string();
        }

        let indicators = state
            .scene_of_response(response)
            .map(|scene| scene.indicators.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|indicator| {
                let value = slot(&indicator_var_name(&indicator.name))
                    .map(str::to_string)
                    .or_else(|| {
                        response
                            .indicators
                            .iter()
                            .find(|existing| existing.id == indicator.id)
                            .map(|existing| existing.value.clone())
                    })
                    .unwrap_or_default();
                IndicatorValue {
                    id: indicator.id.clone(),
                    name: indicator.name.clone(),
                    value,
                }
            })
            .collect();

        let index = response
            .characters
            .iter()
            .position(|c| c.character_id == character_id)
            .unwrap_or(response.characters.len());
        let mut characters = response.characters[..index].to_vec();
        characters.push(turn);

        Response {
            characters,
            indicators,
            ..response.clone()
        }
    }
}

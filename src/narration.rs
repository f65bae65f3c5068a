//! # Roleplay state
//!
//! Plain-data view of a running roleplay: the novel being played (characters,
//! scenes, starts, lorebooks), the narration arena (interactions and responses
//! keyed by id), and user settings.
//!
//! The narration is a tree stored as two maps. Interactions point to their
//! parent response and responses point to their parent interaction; traversal
//! always goes through id lookups and is bounded by the arena size, so a
//! malformed file with a cycle cannot hang a prompt build.
//!
//! State files are YAML (or JSON, which is valid YAML) with camelCase keys and
//! are read with [`load_state`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RpError;

/// Emotion vocabulary used when a character does not declare its own.
pub const BASE_EMOTIONS: [&str; 9] = [
    "angry",
    "sad",
    "happy",
    "disgusted",
    "scared",
    "embarrased",
    "surprised",
    "neutral",
    "confused",
];

fn base_emotions() -> Vec<String> {
    BASE_EMOTIONS.iter().map(|e| e.to_string()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleplayState {
    pub novel: Novel,
    pub narration: Narration,
    pub settings: Settings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Novel {
    pub characters: Vec<Character>,
    pub scenes: Vec<Scene>,
    pub starts: Vec<Start>,
    pub lorebooks: Vec<Lorebook>,
    pub cutscenes: Vec<CutScene>,
    pub battles: Vec<Battle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Character {
    pub id: String,
    pub name: String,
    /// Persona text. May contain `{{char}}`/`{{user}}` placeholders.
    pub description: String,
    /// `key: value` attribute lines.
    pub personality: String,
    /// Example dialogue, blocks separated by `<START>\n`.
    pub example_messages: String,
    pub emotions: Vec<String>,
    pub outfit_description: Option<String>,
    pub lorebook_ids: Vec<String>,
}

impl Default for Character {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            personality: String::new(),
            example_messages: String::new(),
            emotions: base_emotions(),
            outfit_description: None,
            lorebook_ids: Vec::new(),
        }
    }
}

impl Character {
    /// Non-empty `key: value` pairs parsed from [`Character::personality`].
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.personality
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(2, ": ");
                let key = parts.next().unwrap_or_default().trim();
                let value = parts.next().unwrap_or_default().trim();
                (!value.is_empty()).then(|| (key.to_string(), value.to_string()))
            })
            .collect()
    }

    pub fn sample_chat(&self) -> Vec<String> {
        self.example_messages
            .split("<START>\n")
            .map(str::trim)
            .filter(|block| !block.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scene {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub characters: Vec<SceneCharacter>,
    pub lorebook_ids: Vec<String>,
    pub indicators: Vec<Indicator>,
    /// Cutscene played when the story enters this scene.
    pub cut_scene: Option<SceneCutScene>,
}

impl Scene {
    pub fn has_character(&self, character_id: &str) -> bool {
        self.characters.iter().any(|c| c.character_id == character_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SceneCharacter {
    pub character_id: String,
    pub objective: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    #[default]
    Percentage,
    Amount,
    Discrete,
}

/// A tracked scene value (affection, money, mood...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Indicator {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: IndicatorKind,
    pub min: i64,
    pub max: i64,
    pub values: Vec<String>,
    /// Whether the model should infer the value on each turn.
    pub inferred: bool,
}

impl Indicator {
    pub fn unit(&self) -> &'static str {
        match self.kind {
            IndicatorKind::Percentage => "%",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SceneCutScene {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CutScene {
    pub id: String,
    pub parts: Vec<CutScenePart>,
}

impl CutScene {
    /// Narration text of every part: descriptions between `*`, dialogue in
    /// quotes, one line each. `None` for a cutscene without parts.
    pub fn prompt(&self) -> Option<String> {
        if self.parts.is_empty() {
            return None;
        }
        let text = self
            .parts
            .iter()
            .map(|part| {
                part.text
                    .iter()
                    .map(|line| match line.kind {
                        CutSceneTextKind::Description => format!("*{}*", line.content),
                        CutSceneTextKind::Dialogue => format!("\"{}\"", line.content),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect::<Vec<_>>()
            .join("\n");
        Some(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CutScenePart {
    pub id: String,
    pub text: Vec<CutSceneText>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutSceneTextKind {
    #[default]
    Description,
    Dialogue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CutSceneText {
    #[serde(rename = "type")]
    pub kind: CutSceneTextKind,
    pub content: String,
}

/// Battle settings referenced from the narration. Only the parts that end up
/// in prompts are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Battle {
    pub battle_id: String,
    pub prompt: Option<String>,
    pub intro_cutscene_id: Option<String>,
    pub win_cutscene_id: Option<String>,
    pub loss_cutscene_id: Option<String>,
}

/// Maps a root response to the scene it opens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Start {
    pub id: String,
    pub scene_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lorebook {
    pub id: String,
    pub is_global: bool,
    pub entries: Vec<LorebookEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LorebookEntry {
    pub keys: Vec<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Narration {
    pub current_response_id: String,
    pub interactions: HashMap<String, Interaction>,
    pub responses: HashMap<String, Response>,
}

/// A user turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Interaction {
    pub id: String,
    pub parent_response_id: Option<String>,
    pub query: String,
    pub scene_id: String,
    pub responses_id: Vec<String>,
    /// Set when this turn follows a battle.
    pub after_battle: Option<AfterBattle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AfterBattle {
    pub battle_id: String,
    pub is_win: bool,
}

/// One or more character turns answering an interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    pub id: String,
    pub selected: bool,
    pub fetching: bool,
    pub parent_interaction_id: Option<String>,
    pub selected_character_id: Option<String>,
    pub characters: Vec<CharacterResponse>,
    pub children_interactions: Vec<ChildInteraction>,
    pub indicators: Vec<IndicatorValue>,
    /// Battle started right after this response.
    pub battle_start_id: Option<String>,
}

impl Response {
    pub fn character(&self, character_id: &str) -> Option<&CharacterResponse> {
        self.characters.iter().find(|c| c.character_id == character_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterResponse {
    pub character_id: String,
    pub text: String,
    pub emotion: String,
    pub pose: String,
    pub reasoning: String,
    pub inner_thoughts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChildInteraction {
    pub interaction_id: String,
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndicatorValue {
    pub id: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub user: UserSettings,
    pub prompt: PromptSettings,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub name: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            name: "Anon".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptSettings {
    pub system_prompt: String,
    pub reasoning_enabled: bool,
}

/// A node on the active dialogue path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dialogue<'a> {
    Interaction(&'a Interaction),
    Response(&'a Response),
}

/// One line of chat, attributed to its speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub name: String,
    pub text: String,
}

/// A character of the last loaded response's scene and what it last showed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedCharacter {
    pub id: String,
    pub text: String,
    pub emotion: String,
}

impl RoleplayState {
    pub fn character(&self, id: &str) -> Option<&Character> {
        self.novel.characters.iter().find(|c| c.id == id)
    }

    pub fn cutscene(&self, id: &str) -> Option<&CutScene> {
        self.novel.cutscenes.iter().find(|c| c.id == id)
    }

    pub fn battle(&self, id: &str) -> Option<&Battle> {
        self.novel.battles.iter().find(|b| b.battle_id == id)
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.novel.scenes.iter().find(|s| s.id == id)
    }

    /// Character id → display name.
    pub fn character_names(&self) -> HashMap<String, String> {
        self.novel
            .characters
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect()
    }

    pub fn current_response(&self) -> Option<&Response> {
        self.narration
            .responses
            .get(&self.narration.current_response_id)
    }

    /// Scene a response belongs to: its parent interaction's scene, or for a
    /// root response the scene of the start it opens.
    pub fn scene_of_response(&self, response: &Response) -> Option<&Scene> {
        match &response.parent_interaction_id {
            Some(interaction_id) => self
                .narration
                .interactions
                .get(interaction_id)
                .and_then(|interaction| self.scene(&interaction.scene_id)),
            None => self
                .novel
                .starts
                .iter()
                .find(|start| start.id == response.id)
                .and_then(|start| self.scene(&start.scene_id)),
        }
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        self.current_response()
            .and_then(|response| self.scene_of_response(response))
    }

    /// Character whose turn comes next: the current response's selected
    /// character, else the first character of the current scene.
    pub fn speaking_character_id(&self) -> Option<&str> {
        self.current_response()
            .and_then(|response| response.selected_character_id.as_deref())
            .or_else(|| {
                self.current_scene()
                    .and_then(|scene| scene.characters.first())
                    .map(|character| character.character_id.as_str())
            })
    }

    fn scene_of_dialogue(&self, dialogue: &Dialogue<'_>) -> Option<&Scene> {
        match dialogue {
            Dialogue::Interaction(interaction) => self.scene(&interaction.scene_id),
            Dialogue::Response(response) => self.scene_of_response(response),
        }
    }

    fn max_steps(&self) -> usize {
        self.narration.interactions.len() + self.narration.responses.len() + 1
    }

    /// Dialogues on the active path whose scene includes any of
    /// `character_ids`, newest first, at most `limit` of them.
    ///
    /// The walk starts at the current response and alternates response →
    /// parent interaction → parent response. A missing id ends the walk.
    pub fn parent_dialogues_with_characters(
        &self,
        character_ids: &[&str],
        limit: usize,
    ) -> Vec<Dialogue<'_>> {
        self.walk_parents(limit, |dialogue| self.includes_any(dialogue, character_ids))
    }

    /// Every dialogue on the active path, newest first.
    pub fn parent_dialogues(&self, limit: usize) -> Vec<Dialogue<'_>> {
        self.walk_parents(limit, |_| true)
    }

    fn walk_parents<'a, F>(&'a self, limit: usize, keep: F) -> Vec<Dialogue<'a>>
    where
        F: Fn(&Dialogue<'a>) -> bool,
    {
        let mut dialogues = Vec::new();
        let mut response_id = Some(self.narration.current_response_id.as_str());
        let mut steps = 0;
        let max_steps = self.max_steps();

        while let Some(id) = response_id {
            if dialogues.len() >= limit || steps >= max_steps {
                break;
            }
            steps += 1;

            let Some(response) = self.narration.responses.get(id) else {
                break;
            };
            let dialogue = Dialogue::Response(response);
            if keep(&dialogue) {
                dialogues.push(dialogue);
            }

            let Some(interaction) = response
                .parent_interaction_id
                .as_deref()
                .and_then(|interaction_id| self.narration.interactions.get(interaction_id))
            else {
                break;
            };
            if dialogues.len() >= limit {
                break;
            }
            let dialogue = Dialogue::Interaction(interaction);
            if keep(&dialogue) {
                dialogues.push(dialogue);
            }
            response_id = interaction.parent_response_id.as_deref();
        }

        dialogues
    }

    /// Speaker-labelled messages on the active path, newest first. Turns of
    /// a multi-character response keep their relative order once reversed.
    pub fn chat_history(&self, limit: usize) -> Vec<ChatMessage> {
        let names = self.character_names();
        let mut messages = Vec::new();

        for dialogue in self.parent_dialogues(usize::MAX) {
            match dialogue {
                Dialogue::Interaction(interaction) => messages.push(ChatMessage {
                    name: self.settings.user.name.clone(),
                    text: interaction.query.clone(),
                }),
                Dialogue::Response(response) => {
                    for turn in response.characters.iter().rev() {
                        if turn.text.is_empty() {
                            continue;
                        }
                        messages.push(ChatMessage {
                            name: names
                                .get(&turn.character_id)
                                .cloned()
                                .unwrap_or_else(|| turn.character_id.clone()),
                            text: turn.text.clone(),
                        });
                    }
                }
            }
            if messages.len() >= limit {
                break;
            }
        }

        messages.truncate(limit);
        messages
    }

    fn includes_any(&self, dialogue: &Dialogue<'_>, character_ids: &[&str]) -> bool {
        self.scene_of_dialogue(dialogue)
            .is_some_and(|scene| character_ids.iter().any(|id| scene.has_character(id)))
    }

    /// The response whose characters are currently on screen. While the
    /// current response is still being generated, that is the response the
    /// user answered.
    pub fn last_loaded_response(&self) -> Option<&Response> {
        let current = self.current_response()?;
        if current.fetching {
            if let Some(parent) = current
                .parent_interaction_id
                .as_deref()
                .and_then(|id| self.narration.interactions.get(id))
                .and_then(|interaction| interaction.parent_response_id.as_deref())
                .and_then(|id| self.narration.responses.get(id))
            {
                return Some(parent);
            }
        }
        Some(current)
    }

    pub fn last_loaded_characters(&self) -> Vec<LoadedCharacter> {
        let Some(response) = self.last_loaded_response() else {
            return Vec::new();
        };
        let Some(scene) = self.scene_of_response(response) else {
            return Vec::new();
        };
        scene
            .characters
            .iter()
            .map(|scene_character| {
                let shown = response.character(&scene_character.character_id);
                LoadedCharacter {
                    id: scene_character.character_id.clone(),
                    text: shown.map(|c| c.text.clone()).unwrap_or_default(),
                    emotion: shown.map(|c| c.emotion.clone()).unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Point the current response at the active leaf of the first start when
    /// the stored id is empty or unknown.
    pub fn resolve_current_response(&mut self) {
        if self
            .narration
            .responses
            .contains_key(&self.narration.current_response_id)
        {
            return;
        }
        let leaf = self
            .novel
            .starts
            .iter()
            .find_map(|start| self.follow_selected(&start.id))
            .map(str::to_string);
        if let Some(leaf) = leaf {
            debug!(current_response_id = %leaf, "Resolved current response from start");
            self.narration.current_response_id = leaf;
        }
    }

    /// Follow `selected` child links from `root_id` down to the active leaf
    /// response.
    pub fn follow_selected(&self, root_id: &str) -> Option<&str> {
        let mut leaf = self.narration.responses.get(root_id)?;
        let mut visited = HashSet::new();

        while visited.insert(leaf.id.as_str()) {
            let next = leaf
                .children_interactions
                .iter()
                .find(|child| child.selected)
                .and_then(|child| self.narration.interactions.get(&child.interaction_id))
                .and_then(|interaction| {
                    interaction
                        .responses_id
                        .iter()
                        .filter_map(|id| self.narration.responses.get(id))
                        .find(|response| response.selected)
                });
            match next {
                Some(response) => leaf = response,
                None => break,
            }
        }

        Some(leaf.id.as_str())
    }
}

/// Load a roleplay state from a YAML or JSON file.
///
/// # Errors
/// IO errors reading the file and YAML errors parsing it.
pub fn load_state<P: AsRef<Path>>(path: P) -> Result<RoleplayState, RpError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Loading roleplay state");
    let content = fs::read_to_string(path)?;
    let mut state: RoleplayState = serde_yaml::from_str(&content)?;
    state.resolve_current_response();
    debug!(
        characters = state.novel.characters.len(),
        responses = state.narration.responses.len(),
        interactions = state.narration.interactions.len(),
        "Loaded roleplay state"
    );
    Ok(state)
}

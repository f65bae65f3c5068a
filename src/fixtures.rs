//! Roleplay states shared by the unit tests.

use std::collections::HashMap;

use crate::narration::{
    Character, CharacterResponse, ChildInteraction, Interaction, Lorebook, LorebookEntry,
    Narration, Novel, PromptSettings, Response, RoleplayState, Scene, SceneCharacter, Settings,
    Start, UserSettings,
};

pub const NALA_ID: &str = "char-nala";
pub const SCENE_ID: &str = "main-hall";
pub const ROOT_RESPONSE_ID: &str = "resp-root";
pub const CURRENT_RESPONSE_ID: &str = "resp-current";

const GREETING: &str = "Hello... mistress... *{{char}} looks down, with her ears pointed to you. She's clearly scared, but she doesn't say anything about her feelings.* I am a good maid, you do not have to punish me okay? I-I can do many things... *{{char}}'s tail wags as she looks down at the floor.* I promise...";

fn nala() -> Character {
    Character {
        id: NALA_ID.to_string(),
        name: "Nala".to_string(),
        description: "{{char}} is your recently hired maid. She will follow every command from {{user}} and is scared to disappoint {{user}}. Her old master was harsh with her.".to_string(),
        personality: "species: Catgirl\nbody: 165 cm tall\nfeatures: Brown eyes, brown hair, fluffy ears".to_string(),
        example_messages: "<START>\n{{char}}: M-mistress.. I am sorry if I can't please you the way you want... *{{char}} looks down at the ground.* I'll try my hardest...\n{{user}}: It's alright. How about you go to the kitchen and clean the dishes?\n{{char}}: Y-Yes mistress... *{{char}} hurries into the kitchen and scrubs every dish until it shines.* Thank you mistress.. I felt useful.".to_string(),
        outfit_description: Some("a black maid dress with a white apron".to_string()),
        lorebook_ids: vec!["lore-nala".to_string(), "lore-mansion".to_string()],
        ..Default::default()
    }
}

fn main_hall() -> Scene {
    Scene {
        id: SCENE_ID.to_string(),
        name: "main hall".to_string(),
        prompt: "{{char}} waits in the main hall of the mansion, holding a feather duster.".to_string(),
        characters: vec![SceneCharacter {
            character_id: NALA_ID.to_string(),
            objective: None,
        }],
        lorebook_ids: vec!["lore-mansion".to_string()],
        indicators: Vec::new(),
        cut_scene: None,
    }
}

fn lorebooks() -> Vec<Lorebook> {
    vec![
        Lorebook {
            id: "lore-world".to_string(),
            is_global: true,
            entries: vec![LorebookEntry {
                keys: vec!["city".to_string()],
                content: "The mansion overlooks a quiet harbor city.".to_string(),
            }],
        },
        Lorebook {
            id: "lore-mansion".to_string(),
            is_global: false,
            entries: vec![LorebookEntry {
                keys: vec!["kitchen".to_string(), "dishes".to_string()],
                content: "The kitchen is on the ground floor, next to the pantry.".to_string(),
            }],
        },
        Lorebook {
            id: "lore-nala".to_string(),
            is_global: false,
            entries: vec![LorebookEntry {
                keys: vec!["master".to_string()],
                content: "{{char}} fled her old master during a storm.".to_string(),
            }],
        },
    ]
}

fn response(id: &str, parent: Option<&str>, text: &str, emotion: &str, child: Option<&str>) -> Response {
    Response {
        id: id.to_string(),
        selected: true,
        fetching: false,
        parent_interaction_id: parent.map(str::to_string),
        selected_character_id: Some(NALA_ID.to_string()),
        characters: vec![CharacterResponse {
            character_id: NALA_ID.to_string(),
            text: text.to_string(),
            emotion: emotion.to_string(),
            pose: "standing".to_string(),
            ..Default::default()
        }],
        children_interactions: child
            .map(|interaction_id| ChildInteraction {
                interaction_id: interaction_id.to_string(),
                selected: true,
            })
            .into_iter()
            .collect(),
        indicators: Vec::new(),
        battle_start_id: None,
    }
}

fn fetching_response(id: &str, parent: &str) -> Response {
    Response {
        id: id.to_string(),
        selected: true,
        fetching: true,
        parent_interaction_id: Some(parent.to_string()),
        selected_character_id: Some(NALA_ID.to_string()),
        ..Default::default()
    }
}

fn interaction(id: &str, parent: &str, query: &str, response_id: &str) -> Interaction {
    Interaction {
        id: id.to_string(),
        parent_response_id: Some(parent.to_string()),
        query: query.to_string(),
        scene_id: SCENE_ID.to_string(),
        responses_id: vec![response_id.to_string()],
        after_battle: None,
    }
}

fn novel() -> Novel {
    Novel {
        characters: vec![nala()],
        scenes: vec![main_hall()],
        starts: vec![Start {
            id: ROOT_RESPONSE_ID.to_string(),
            scene_id: SCENE_ID.to_string(),
        }],
        lorebooks: lorebooks(),
        cutscenes: Vec::new(),
        battles: Vec::new(),
    }
}

fn settings() -> Settings {
    Settings {
        user: UserSettings {
            name: "Anon".to_string(),
        },
        prompt: PromptSettings::default(),
        language: "en".to_string(),
    }
}

/// Greeting, one user message, and an empty response being generated.
pub fn single_turn_state() -> RoleplayState {
    let mut responses = HashMap::new();
    let mut interactions = HashMap::new();

    responses.insert(
        ROOT_RESPONSE_ID.to_string(),
        response(ROOT_RESPONSE_ID, None, GREETING, "happy", Some("int-1")),
    );
    interactions.insert(
        "int-1".to_string(),
        interaction("int-1", ROOT_RESPONSE_ID, "good morning nala.", CURRENT_RESPONSE_ID),
    );
    responses.insert(
        CURRENT_RESPONSE_ID.to_string(),
        fetching_response(CURRENT_RESPONSE_ID, "int-1"),
    );

    RoleplayState {
        novel: novel(),
        narration: Narration {
            current_response_id: CURRENT_RESPONSE_ID.to_string(),
            interactions,
            responses,
        },
        settings: settings(),
    }
}

const QUERIES: [&str; 6] = [
    "Could you bring me some tea from the kitchen, please?",
    "Tell me about your old master. Were they kind to you?",
    "The garden needs some care today. Do you know anything about roses?",
    "I heard a noise in the basement last night. Did you hear it too?",
    "You did a wonderful job with the dishes. What would you like as a reward?",
    "Let's take a walk to the city this afternoon. Have you ever been there?",
];

const REPLIES: [&str; 6] = [
    "Y-yes mistress! *{{char}} bows deeply and scurries off toward the kitchen, her tail swishing nervously behind her. A few minutes later she returns with a silver tray, the teacup rattling slightly in her trembling hands.* H-here you are... I hope it is not too hot...",
    "*{{char}}'s ears flatten against her head and she stares at the floor for a long moment.* He... he was not kind, mistress. He shouted a lot and locked me in the cellar when I broke things. *She rubs her arm absently.* But that is in the past now, right?",
    "Roses? *{{char}} tilts her head, her fluffy ears perking up with curiosity.* I used to watch the gardener at my old house. You have to cut the dead flowers so the new ones can grow. I could try, if you let me borrow some scissors...",
    "*{{char}} freezes, her tail puffing up to twice its size.* A n-noise? I... I did not hear anything, mistress. *She glances toward the basement door and shuffles closer to you.* M-maybe it was just the wind? Please do not make me go down there alone...",
    "A reward? For me? *{{char}}'s eyes go wide and she fidgets with the hem of her apron.* I... I do not need anything, mistress. Being allowed to stay here is more than enough. *Her tail wags despite her protest.* Maybe... maybe a little fish for dinner?",
    "*{{char}} clasps her hands together, her whole face lighting up.* The city? I have only seen it from the window of the carriage! *She bounces on her toes before catching herself and smoothing her dress.* I-I mean, I would be honored to accompany you, mistress.",
];

/// Sixty exchanges, far more than fits a 4k context.
pub fn long_conversation_state() -> RoleplayState {
    let exchanges = 60;
    let mut responses = HashMap::new();
    let mut interactions = HashMap::new();

    responses.insert(
        "resp-0".to_string(),
        response("resp-0", None, GREETING, "happy", Some("int-1")),
    );

    for i in 1..=exchanges {
        let interaction_id = format!("int-{i}");
        let response_id = format!("resp-{i}");
        let parent_id = format!("resp-{}", i - 1);
        interactions.insert(
            interaction_id.clone(),
            interaction(&interaction_id, &parent_id, QUERIES[i % QUERIES.len()], &response_id),
        );

        let next = format!("int-{}", i + 1);
        let response = if i == exchanges {
            fetching_response(&response_id, &interaction_id)
        } else {
            response(
                &response_id,
                Some(&interaction_id),
                REPLIES[i % REPLIES.len()],
                ["sad", "scared", "happy", "embarrased"][i % 4],
                Some(&next),
            )
        };
        responses.insert(response_id, response);
    }

    let mut novel = novel();
    novel.starts[0].id = "resp-0".to_string();

    RoleplayState {
        novel,
        narration: Narration {
            current_response_id: format!("resp-{exchanges}"),
            interactions,
            responses,
        },
        settings: settings(),
    }
}

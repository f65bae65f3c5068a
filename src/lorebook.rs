//! Keyword-triggered lorebook lookup.
//!
//! Entries are matched key index by key index: every entry's first key is
//! tried against the messages before any entry's second key, so an entry that
//! declares a keyword first wins over one that merely lists it later.

use std::collections::HashSet;

use crate::narration::{Lorebook, LorebookEntry, RoleplayState};

/// Lowercase and keep only letters, digits, whitespace and apostrophes.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '\'')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Entries whose keys appear in `messages`, in priority order.
///
/// Callers usually keep only the first few. No match is an empty list.
pub fn find_lorebook_entries<'a, S: AsRef<str>>(
    messages: &[S],
    entries: &'a [LorebookEntry],
) -> Vec<&'a LorebookEntry> {
    let messages: Vec<String> = messages.iter().map(|m| normalize(m.as_ref())).collect();
    let keys: Vec<Vec<String>> = entries
        .iter()
        .map(|entry| entry.keys.iter().map(|key| normalize(key)).collect())
        .collect();
    let longest = keys.iter().map(Vec::len).max().unwrap_or(0);

    let mut selected = Vec::new();
    let mut taken = vec![false; entries.len()];

    for key_index in 0..longest {
        for (entry_index, entry) in entries.iter().enumerate() {
            if taken[entry_index] {
                continue;
            }
            let Some(key) = keys[entry_index].get(key_index) else {
                continue;
            };
            if key.trim().is_empty() {
                continue;
            }
            if messages.iter().any(|message| message.contains(key.as_str())) {
                taken[entry_index] = true;
                selected.push(entry);
            }
        }
    }

    selected
}

/// Lorebooks that apply to the current turn: the current scene's, then those
/// of the characters on screen, then the global ones. Each lorebook appears
/// once.
pub fn active_lorebooks(state: &RoleplayState) -> Vec<&Lorebook> {
    let mut seen = HashSet::new();
    let mut ids: Vec<&str> = Vec::new();

    let scene_ids = state
        .current_scene()
        .map(|scene| scene.lorebook_ids.iter().map(String::as_str).collect::<Vec<_>>())
        .unwrap_or_default();

    let loaded = state.last_loaded_characters();
    let character_ids: Vec<&str> = loaded
        .iter()
        .filter_map(|loaded| state.character(&loaded.id))
        .flat_map(|character| character.lorebook_ids.iter().map(String::as_str))
        .collect();

    let global_ids = state
        .novel
        .lorebooks
        .iter()
        .filter(|lorebook| lorebook.is_global)
        .map(|lorebook| lorebook.id.as_str());

    for id in scene_ids.into_iter().chain(character_ids).chain(global_ids) {
        if seen.insert(id) {
            ids.push(id);
        }
    }

    ids.into_iter()
        .filter_map(|id| state.novel.lorebooks.iter().find(|lorebook| lorebook.id == id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn entry(keys: &[&str], content: &str) -> LorebookEntry {
        LorebookEntry {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_first_key_beats_later_key() {
        let entries = vec![entry(&["a", "b"], "first"), entry(&["b"], "second")];
        let found = find_lorebook_entries(&["just b here"], &entries);

        let contents: Vec<&str> = found.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "first"]);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let entries = vec![entry(&["castle"], "one"), entry(&["castle"], "two")];
        let found = find_lorebook_entries(&["The CASTLE gates"], &entries);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].content, "one");
    }

    #[test]
    fn test_punctuation_is_ignored() {
        let entries = vec![entry(&["Lady Vex"], "the queen")];
        let found = find_lorebook_entries(&["Have you seen Lady-Vex? No, lady vex!"], &entries);
        assert_eq!(found.len(), 1);
        assert_eq!(normalize("Don't, STOP!"), "don't stop");
    }

    #[test]
    fn test_no_match_is_empty() {
        let entries = vec![entry(&["dragon"], "big"), entry(&[], "never"), entry(&[""], "blank")];
        assert!(find_lorebook_entries(&["a quiet morning"], &entries).is_empty());
    }

    #[test]
    fn test_active_lorebooks_order_and_dedup() {
        let state = fixtures::single_turn_state();
        let ids: Vec<&str> = active_lorebooks(&state)
            .iter()
            .map(|lorebook| lorebook.id.as_str())
            .collect();
        assert_eq!(ids, vec!["lore-mansion", "lore-nala", "lore-world"]);
    }
}

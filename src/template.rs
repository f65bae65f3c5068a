//! # Prompt templates
//!
//! A [`PromptTemplate`] is what every strategy produces: the fully assembled
//! prompt text, the variable table the completion service needs to resolve
//! `{{SEL ...}}` options, and an estimate of how many tokens the whole
//! generation will consume.
//!
//! Templates use a double-brace directive syntax understood by the completion
//! service:
//!
//! ```text
//! {{char}}'s reaction:{{SEL emotion options=emotions}}
//! {{char}}:{{GEN text max_tokens=200 stop=["\nAnon:","<|im_end|>"]}}
//! ```
//!
//! This module also holds the text utilities shared by the strategies:
//! - [`count_template_tokens`]: the shared token estimate (literal text plus
//!   every `max_tokens=` reservation found in directives),
//! - [`fill_text_template`]: replaces `{{char}}`/`{{user}}`/`{{<id>}}` placeholders,
//! - [`parse_llm_response`]: trims a raw generation at its first stop marker,
//! - [`quote_stop`]: quotes a stop marker for a directive's `stop=[...]` list.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tokenizer::Tokenizer;

/// A template variable: either a literal or a list of options for `{{SEL}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateVariable {
    Text(String),
    Options(Vec<String>),
}

impl From<&str> for TemplateVariable {
    fn from(value: &str) -> Self {
        TemplateVariable::Text(value.to_string())
    }
}

impl From<Vec<String>> for TemplateVariable {
    fn from(value: Vec<String>) -> Self {
        TemplateVariable::Options(value)
    }
}

/// Variables sent along with a template.
pub type TemplateVariables = BTreeMap<String, TemplateVariable>;

/// A snapshot of generation slots: slot name → latest (possibly partial) text.
pub type GenerationVariables = BTreeMap<String, String>;

/// A built prompt. Immutable once returned by a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Assembled prompt text, including generation directives.
    pub template: String,

    /// Variables referenced by the directives.
    pub variables: TemplateVariables,

    /// Estimated total tokens (prompt plus reserved generation). An estimate,
    /// never measured after the fact.
    #[serde(rename = "totalTokens")]
    pub total_tokens: usize,
}

static DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{.*?\}\}").expect("directive pattern is valid"));

static MAX_TOKENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"max_tokens=(\d+)").expect("max_tokens pattern is valid"));

/// Estimate the tokens a template will consume.
///
/// Every `{{...}}` directive is removed before the literal text is tokenized,
/// and every `max_tokens=<n>` found inside a directive adds `n`, since the
/// completion may emit up to that many tokens there. The result is an upper
/// bound, not an exact count of what the model will produce.
///
/// # Examples
/// ```rust
/// use awful_rp::template::count_template_tokens;
/// use awful_rp::tokenizer::TiktokenTokenizer;
///
/// let tokenizer = TiktokenTokenizer::new().unwrap();
/// let plain = count_template_tokens(&tokenizer, "this is a random test");
/// let with_gen =
///     count_template_tokens(&tokenizer, "this is a random{{GEN a max_tokens=150}} test");
/// assert_eq!(with_gen, plain + 150);
/// ```
pub fn count_template_tokens(tokenizer: &dyn Tokenizer, template: &str) -> usize {
    let reserved: usize = DIRECTIVE
        .find_iter(template)
        .flat_map(|directive| {
            MAX_TOKENS
                .captures_iter(directive.as_str())
                .filter_map(|caps| caps[1].parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .sum();

    let literal = DIRECTIVE.replace_all(template, "");
    tokenizer.count(&literal) + reserved
}

static GENERATION_SLOT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{\{(?:GEN|SEL)\s+(\w+).*?\}\}").expect("generation slot pattern is valid")
});

/// Replace every `{{GEN name ...}}` and `{{SEL name ...}}` directive with the
/// generated value for `name`, or nothing if the slot was never produced.
///
/// The result is the transcript the model actually saw, ready to be extended
/// with a follow-up question.
pub fn fill_generated(template: &str, snapshot: &GenerationVariables) -> String {
    GENERATION_SLOT
        .replace_all(template, |caps: &regex::Captures<'_>| {
            snapshot.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Names substituted into a template by [`fill_text_template`].
#[derive(Debug, Clone, Default)]
pub struct TemplateNames<'a> {
    /// The user's display name.
    pub user: &'a str,
    /// The current character's display name.
    pub bot: &'a str,
    /// Character id → display name, for `{{<id>}}` placeholders.
    pub characters: HashMap<String, String>,
}

const BOT_PLACEHOLDERS: [&str; 8] = [
    "{{char}}", "{{Char}}", "{{CHAR}}", "<CHAR>", "<BOT>", "{{BOT}}", "{{bot}}", "{{Bot}}",
];

const USER_PLACEHOLDERS: [&str; 5] = ["{{user}}", "{{User}}", "{{USER}}", "<USER>", "<User>"];

/// Replace character and user placeholders with display names.
///
/// Character-id placeholders are replaced last so a character name can never be
/// re-interpreted as a `{{char}}` placeholder.
pub fn fill_text_template(text: &str, names: &TemplateNames<'_>) -> String {
    let mut text = text.to_string();
    for placeholder in BOT_PLACEHOLDERS {
        text = text.replace(placeholder, names.bot);
    }
    for placeholder in USER_PLACEHOLDERS {
        text = text.replace(placeholder, names.user);
    }
    for (id, name) in &names.characters {
        text = text.replace(&format!("{{{{{id}}}}}"), name);
    }
    text
}

/// Quote a stop marker for a directive's `stop=[...]` list.
///
/// The completion service reads the list as JSON strings, so quotes,
/// backslashes and newlines are escaped the same way JSON does.
pub fn quote_stop(stop: &str) -> String {
    serde_json::to_string(stop).unwrap_or_else(|_| format!("\"{}\"", stop.replace('"', "\\\"")))
}

fn text_stops(character: &str) -> Vec<String> {
    let mut stops: Vec<String> = [
        "<|endoftext|>",
        "<START>",
        "USER:",
        "\n\n\n",
        "###",
        "<|user|>",
        "<|model|>",
        "<|system|>",
        "<|im_end|>",
        "<|im_start|>",
        "INST",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if !character.is_empty() {
        stops.push(format!("\n{character}'s reaction:"));
        stops.push(format!("\n{character}:"));
        stops.push(format!("\n*{character}:"));
        stops.push(format!("\n*{character}'s reaction:"));
    }

    stops
}

/// Does `text` contain any of the stop markers for `character`?
pub fn has_text_stop(text: &str, character: &str) -> bool {
    text_stops(character).iter().any(|stop| text.contains(stop.as_str()))
}

fn strip_last_line_break(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}

const SENTENCE_ENDINGS: [char; 5] = ['.', '*', '"', '!', '?'];

/// Clean a raw generation for display.
///
/// 1. Cut at the earliest stop marker (if any) and drop one trailing line break.
/// 2. Drop a trailing incomplete sentence, unless that would leave two
///    characters or fewer.
/// 3. Drop a dangling `*` or `"` that follows a space or line break.
///
/// # Examples
/// ```rust
/// use awful_rp::template::parse_llm_response;
///
/// let raw = "*She smiles.* Welcome home!<|im_end|>\n<|im_start|>user";
/// assert_eq!(parse_llm_response(raw, "Nala"), "*She smiles.* Welcome home!");
/// ```
pub fn parse_llm_response(text: &str, character: &str) -> String {
    let has_stop = has_text_stop(text, character);
    let mut text = text.trim().to_string();

    if has_stop {
        let first_stop = text_stops(character)
            .iter()
            .filter_map(|stop| text.find(stop.as_str()))
            .min();
        if let Some(index) = first_stop {
            text.truncate(index);
            text = strip_last_line_break(&text).to_string();
        }
    } else {
        text = strip_last_line_break(text.trim()).to_string();
    }

    let mut text = text.trim().to_string();

    let trimmed = text.trim_end_matches(|c: char| !SENTENCE_ENDINGS.contains(&c));
    if trimmed.chars().count() > 2 {
        let mut candidate: Vec<char> = trimmed.chars().collect();
        let len = candidate.len();
        if ['*', '"'].contains(&candidate[len - 1]) && ['\n', ' '].contains(&candidate[len - 2]) {
            candidate.pop();
        }
        text = candidate.into_iter().collect();
    }

    text.trim().trim_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TiktokenTokenizer;

    #[test]
    fn test_count_tokens_adds_directive_reservations() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let plain = count_template_tokens(&tokenizer, "this is a random tests for counting tokens");
        assert_eq!(plain, tokenizer.count("this is a random tests for counting tokens"));

        assert_eq!(
            count_template_tokens(
                &tokenizer,
                "this is a random{{GEN sa max_tokens=150}} tests for counting tokens"
            ),
            plain + 150
        );
        assert_eq!(
            count_template_tokens(
                &tokenizer,
                "this is a random{{GEN ab max_tokens=20}} tests for counting tokens{{GEN ba max_tokens=20}}"
            ),
            plain + 40
        );
        assert_eq!(
            count_template_tokens(
                &tokenizer,
                "this is a random{{GEN max_tokens=15 stop=[]}} tests for counting tokens{{test}}"
            ),
            plain + 15
        );
    }

    #[test]
    fn test_count_tokens_ignores_max_tokens_outside_directives() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let text = "set max_tokens=500 in the request";
        assert_eq!(count_template_tokens(&tokenizer, text), tokenizer.count(text));
    }

    #[test]
    fn test_fill_generated_replaces_slots() {
        let mut snapshot = GenerationVariables::new();
        snapshot.insert("emotion".to_string(), " happy".to_string());
        snapshot.insert("text".to_string(), " Good morning!".to_string());

        let filled = fill_generated(
            "Nala's reaction:{{SEL emotion options=emotions}}\nNala:{{GEN text max_tokens=200 stop=[\"\\nAnon:\"]}}{{GEN mood max_tokens=3}}",
            &snapshot,
        );
        assert_eq!(filled, "Nala's reaction: happy\nNala: Good morning!");
    }

    #[test]
    fn test_fill_text_template_replaces_every_form() {
        let mut characters = HashMap::new();
        characters.insert("char-roxy".to_string(), "Roxy".to_string());
        let names = TemplateNames {
            user: "Anon",
            bot: "Nala",
            characters,
        };

        let filled = fill_text_template(
            "{{char}} {{Char}} <BOT> greets {{user}} and <USER>; {{char-roxy}} waves.",
            &names,
        );
        assert_eq!(filled, "Nala Nala Nala greets Anon and Anon; Roxy waves.");
    }

    #[test]
    fn test_parse_llm_response_cuts_at_character_stop() {
        let raw = "  Of course, mistress!\nNala's reaction: happy";
        assert_eq!(parse_llm_response(raw, "Nala"), "Of course, mistress!");
    }

    #[test]
    fn test_parse_llm_response_drops_incomplete_sentence() {
        assert_eq!(
            parse_llm_response("I can cook. I can clea", ""),
            "I can cook."
        );
    }

    #[test]
    fn test_parse_llm_response_keeps_short_partial_text() {
        assert_eq!(parse_llm_response("Hel", ""), "Hel");
        assert_eq!(parse_llm_response("Hello wor", ""), "Hello wor");
    }

    #[test]
    fn test_parse_llm_response_drops_dangling_asterisk() {
        assert_eq!(
            parse_llm_response("\"Welcome back.\" *", ""),
            "\"Welcome back.\""
        );
    }

    #[test]
    fn test_quote_stop_escapes_quotes_and_newlines() {
        let quoted = quote_stop("\nThe \"Boss\":");
        assert_eq!(quoted, r#""\nThe \"Boss\":""#);
        let parsed: String = serde_json::from_str(&quoted).unwrap();
        assert_eq!(parsed, "\nThe \"Boss\":");
    }
}

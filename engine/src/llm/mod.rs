//! Language model plumbing
//!
//! The bundled OpenAI-compatible adapter plus helpers for pulling structured
//! replies out of free-form completions. Models wrap JSON in markdown fences,
//! prefix it with prose, or answer with a bare ```sql block; the helpers here
//! cope with all of that.

use ace_sdk::errors::ModelError;
use serde::de::DeserializeOwned;

pub mod openai;

pub use openai::OpenAiCompatModel;

/// Locate the first JSON object in a completion
///
/// Tries, in order: a fenced block whose body is an object, the whole reply,
/// and finally the first balanced `{...}` span embedded in prose.
pub fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();

    if let Some(body) = extract_fenced_block(trimmed, None) {
        let body = body.trim();
        if body.starts_with('{') {
            if let Some(obj) = extract_balanced_json(body) {
                return Some(obj);
            }
        }
    }

    let start = trimmed.find('{')?;
    extract_balanced_json(&trimmed[start..])
}

/// Body of the first ```sql fenced block
pub fn extract_sql_fence(content: &str) -> Option<&str> {
    extract_fenced_block(content, Some("sql"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Deserialize the first JSON object found in `content`
pub fn parse_json_reply<T: DeserializeOwned>(content: &str) -> Result<T, ModelError> {
    let json = extract_json_object(content)
        .ok_or_else(|| ModelError::MalformedOutput("no JSON object in reply".to_string()))?;
    serde_json::from_str(json).map_err(|e| ModelError::MalformedOutput(e.to_string()))
}

/// Body of the first fenced block, optionally requiring a language tag
fn extract_fenced_block<'a>(content: &'a str, lang: Option<&str>) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(rel) = content[search_from..].find("```") {
        let fence_start = search_from + rel;
        let after_opening = &content[fence_start + 3..];

        // Language tag runs to the end of the opening line
        let tag_end = after_opening.find('\n')?;
        let tag = after_opening[..tag_end].trim();
        let body_start = fence_start + 3 + tag_end + 1;

        let closing = content[body_start..].find("```")?;
        let body_end = body_start + closing;

        let tag_matches = match lang {
            Some(want) => tag.eq_ignore_ascii_case(want),
            None => true,
        };
        if tag_matches && body_start < body_end {
            return Some(&content[body_start..body_end]);
        }
        search_from = body_end + 3;
    }
    None
}

fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

//! Parsing the decomposition agent's final text into subtasks.
//!
//! Three parsers are tried in order (§4.3 step 8): a primary XML-ish
//! parser expecting `id`/`type`/`depends_on` attributes, a fallback that
//! accepts bare `<task>` tags with no attributes, and a last-resort
//! fallback that hunts for a JSON object carrying a `"subtasks"` array.
//! The first one to produce at least one subtask wins.

use regex::Regex;
use relay_types::{AgentType, MemoryLevel, Subtask};
use std::sync::LazyLock;

/// One subtask as parsed, before agent-type resolution and memory tagging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSubtask {
    /// The subtask's id. Assigned by parsing order when the source has none.
    pub id: String,
    /// The subtask's natural-language instruction.
    pub content: String,
    /// The raw `type` string, if the source gave one explicitly.
    pub agent_type: Option<String>,
    /// Dependency ids, in source order.
    pub depends_on: Vec<String>,
}

static TASKS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tasks>(.*?)</tasks>").expect("valid regex"));
static ATTRIBUTED_TASK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<task\s+([^>]*)>(.*?)</task>"#).expect("valid regex"));
static BARE_TASK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<task>(.*?)</task>").expect("valid regex"));
static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).expect("valid regex"));

/// Primary parser: `<tasks><task id="…" type="…" depends_on="a,b">body</task>…</tasks>`.
pub fn parse_attributed(text: &str) -> Option<Vec<RawSubtask>> {
    let block = TASKS_BLOCK.captures(text)?.get(1)?.as_str();
    let mut out = Vec::new();
    for (idx, cap) in ATTRIBUTED_TASK.captures_iter(block).enumerate() {
        let attrs_str = cap.get(1)?.as_str();
        let content = cap.get(2)?.as_str().trim().to_string();

        let mut id = None;
        let mut agent_type = None;
        let mut depends_on = Vec::new();
        for attr in ATTRIBUTE.captures_iter(attrs_str) {
            let key = &attr[1];
            let value = &attr[2];
            match key {
                "id" => id = Some(value.to_string()),
                "type" => agent_type = Some(value.to_string()),
                "depends_on" => {
                    depends_on = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect();
                }
                _ => {}
            }
        }

        out.push(RawSubtask {
            id: id.unwrap_or_else(|| (idx + 1).to_string()),
            content,
            agent_type,
            depends_on,
        });
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Fallback 1: bare `<task>body</task>` with no attributes at all. Ids
/// are assigned by position; type is always inferred.
pub fn parse_bare(text: &str) -> Option<Vec<RawSubtask>> {
    let out: Vec<RawSubtask> = BARE_TASK
        .captures_iter(text)
        .enumerate()
        .map(|(idx, cap)| RawSubtask {
            id: (idx + 1).to_string(),
            content: cap[1].trim().to_string(),
            agent_type: None,
            depends_on: Vec::new(),
        })
        .collect();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[derive(serde::Deserialize)]
struct JsonSubtask {
    id: String,
    content: String,
    #[serde(rename = "type")]
    agent_type: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// Fallback 2: the first JSON object in `text` with a `"subtasks"` key,
/// parsed as `{subtasks: [{id, content, type, depends_on}]}`.
pub fn parse_json_subtasks(text: &str) -> Option<Vec<RawSubtask>> {
    let value = extract_first_json_object_with_key(text, "subtasks")?;
    let subtasks: Vec<JsonSubtask> = serde_json::from_value(value.get("subtasks")?.clone()).ok()?;
    if subtasks.is_empty() {
        return None;
    }
    Some(
        subtasks
            .into_iter()
            .map(|s| RawSubtask {
                id: s.id,
                content: s.content,
                agent_type: s.agent_type,
                depends_on: s.depends_on,
            })
            .collect(),
    )
}

fn extract_first_json_object_with_key(text: &str, key: &str) -> Option<serde_json::Value> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('{') {
        let start = search_from + rel;
        match matching_brace(text, start) {
            Some(end) => {
                let candidate = &text[start..=end];
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
                    if value.get(key).is_some() {
                        return Some(value);
                    }
                }
                search_from = start + 1;
            }
            None => break,
        }
    }
    None
}

fn matching_brace(text: &str, open_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, c) in text.char_indices().skip(open_idx) {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_agent_type(raw: Option<&str>, content: &str) -> AgentType {
    raw.and_then(|s| match s.trim().to_lowercase().as_str() {
        "browser" => Some(AgentType::Browser),
        "document" => Some(AgentType::Document),
        "code" => Some(AgentType::Code),
        "multi_modal" | "multimodal" | "multi-modal" => Some(AgentType::MultiModal),
        _ => None,
    })
    .unwrap_or_else(|| AgentType::infer(content))
}

/// Resolve a batch of [`RawSubtask`]s into real [`Subtask`]s, tagging
/// each with `memory_level` and inferring any unresolved agent type.
pub fn into_subtasks(raw: Vec<RawSubtask>, memory_level: MemoryLevel) -> Vec<Subtask> {
    raw.into_iter()
        .map(|r| {
            let agent_type = parse_agent_type(r.agent_type.as_deref(), &r.content);
            let mut subtask = Subtask::new(r.id, r.content, agent_type);
            subtask.depends_on = r.depends_on;
            subtask.memory_level = memory_level;
            subtask
        })
        .collect()
}

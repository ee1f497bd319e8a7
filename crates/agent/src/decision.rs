//! Decision parsing
//!
//! Model output is untrusted. Every response is turned into exactly one
//! [`Decision`] here and nothing downstream looks at raw model text.
//!
//! Native tool calls become action requests directly. Without them, a fenced
//! json block (or a reply that is one JSON object) using the
//! `{"actions": [{"action": ..., "action_input": {...}}]}` or single
//! `{"action": ..., "action_input": ...}` form is read as action requests.
//! Plain text is the final answer.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use warden_provider::ChatResponse;
use warden_session::ActionRequest;

/// Name a text-protocol reply uses to deliver its answer
pub const FINAL_ANSWER_ACTION: &str = "final_answer";

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    FinalAnswer(String),
    Actions {
        /// Model text accompanying the calls, if any
        text: Option<String>,
        requests: Vec<ActionRequest>,
    },
    Malformed(String),
}

/// Interpret one model response issued for turn number `turn`
pub fn parse_decision(response: &ChatResponse, turn: u32) -> Decision {
    let text = response.content.as_deref().unwrap_or("").trim();

    if response.finish_reason == "error" {
        return Decision::Malformed(if text.is_empty() {
            "model endpoint reported an error".to_string()
        } else {
            text.to_string()
        });
    }

    if response.has_tool_calls() {
        let mut seen = HashSet::new();
        let mut requests = Vec::with_capacity(response.tool_calls.len());
        for (i, call) in response.tool_calls.iter().enumerate() {
            let name = call.name.trim();
            if name.is_empty() {
                return Decision::Malformed(format!("tool call {} has no name", i));
            }
            let arguments = match arguments_from(&call.arguments) {
                Ok(arguments) => arguments,
                Err(reason) => {
                    return Decision::Malformed(format!("arguments of {}: {}", name, reason))
                }
            };
            let mut call_id = call.id.clone();
            let mut n = i;
            while call_id.is_empty() || seen.contains(&call_id) {
                call_id = format!("call_{}_{}", turn, n);
                n += 1;
            }
            seen.insert(call_id.clone());
            requests.push(ActionRequest::new(call_id, name, arguments));
        }
        return Decision::Actions {
            text: non_empty(text),
            requests,
        };
    }

    if text.is_empty() {
        return Decision::Malformed("empty response".to_string());
    }

    match find_json(text) {
        Some(block) => match parse_lenient(block.json) {
            Some(value) => match actions_from(&value, turn) {
                Ok(Some(decision)) => match decision {
                    Decision::Actions { requests, .. } => Decision::Actions {
                        text: non_empty(block.surrounding.trim()),
                        requests,
                    },
                    other => other,
                },
                Ok(None) => Decision::FinalAnswer(text.to_string()),
                Err(reason) => Decision::Malformed(reason),
            },
            None if block.fenced => {
                debug!("Unparseable action block: {}", block.json);
                Decision::Malformed("fenced json block could not be parsed".to_string())
            }
            None => Decision::FinalAnswer(text.to_string()),
        },
        None => Decision::FinalAnswer(text.to_string()),
    }
}

struct JsonBlock<'a> {
    json: &'a str,
    /// Text outside the block
    surrounding: String,
    fenced: bool,
}

fn find_json(text: &str) -> Option<JsonBlock<'_>> {
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let body_start = start + fence.len();
            let rest = &text[body_start..];
            let (json, end) = match rest.find("```") {
                Some(end) => (rest[..end].trim(), body_start + end + 3),
                None => (rest.trim(), text.len()),
            };
            if json.starts_with('{') {
                return Some(JsonBlock {
                    json,
                    surrounding: format!("{}{}", &text[..start], &text[end..]),
                    fenced: true,
                });
            }
        }
    }
    if text.starts_with('{') && text.ends_with('}') {
        return Some(JsonBlock {
            json: text,
            surrounding: String::new(),
            fenced: false,
        });
    }
    None
}

/// Parse JSON, retrying once with trailing commas removed
pub fn parse_lenient(json: &str) -> Option<Value> {
    serde_json::from_str(json)
        .ok()
        .or_else(|| serde_json::from_str(&repair_json(json)).ok())
}

fn repair_json(json: &str) -> String {
    match Regex::new(r",\s*([}\]])") {
        Ok(re) => re.replace_all(json, "$1").into_owned(),
        Err(_) => json.to_string(),
    }
}

fn arguments_from(value: &Value) -> Result<Map<String, Value>, String> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Map::new()),
        Value::String(s) => match parse_lenient(s) {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err("not a JSON object".to_string()),
            None => Err("invalid JSON".to_string()),
        },
        _ => Err("not a JSON object".to_string()),
    }
}

/// `Ok(None)` when the object is not an action block at all
fn actions_from(value: &Value, turn: u32) -> Result<Option<Decision>, String> {
    let items: Vec<&Value> = match (value.get("actions"), value.get("action")) {
        (Some(Value::Array(items)), _) => items.iter().collect(),
        (Some(_), _) => return Err("\"actions\" must be a list".to_string()),
        (None, Some(_)) => vec![value],
        (None, None) => return Ok(None),
    };
    if items.is_empty() {
        return Err("\"actions\" is empty".to_string());
    }

    let mut requests = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = item
            .get("action")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("action {} has no name", i))?;
        let input = item.get("action_input").unwrap_or(&Value::Null);

        if name == FINAL_ANSWER_ACTION {
            if items.len() > 1 {
                return Err("final_answer cannot be combined with other actions".to_string());
            }
            let answer = match input {
                Value::String(s) => s.clone(),
                Value::Object(map) => match map.get("answer").and_then(Value::as_str) {
                    Some(answer) => answer.to_string(),
                    None => input.to_string(),
                },
                Value::Null => String::new(),
                other => other.to_string(),
            };
            return Ok(Some(Decision::FinalAnswer(answer)));
        }

        let arguments =
            arguments_from(input).map_err(|reason| format!("input of {}: {}", name, reason))?;
        requests.push(ActionRequest::new(format!("call_{}_{}", turn, i), name, arguments));
    }
    Ok(Some(Decision::Actions {
        text: None,
        requests,
    }))
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

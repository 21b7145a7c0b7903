//! Turning free-form model replies into decisions, drafts and evaluations.
//!
//! Models are asked for JSON but do not always comply, so every parser has a
//! plain-text fallback. Anything that still cannot be interpreted is an
//! [`LlmError`], which the pipeline records as a stage fault.

use agent_core::{Decision, DecisionProposal, Draft, Evaluation, FeedItem, LlmError};
use serde::Deserialize;
use serde_json::Value;

use crate::client::PROVIDER;

const POST_MARKERS: &[&str] = &["\"post\"", "action: post", "decide to post", "create a post"];
const COMMENT_MARKERS: &[&str] = &["\"comment\"", "action: comment", "decide to comment"];
const UPVOTE_MARKERS: &[&str] = &["\"upvote\"", "action: upvote", "decide to upvote"];

/// Operator phrasing that pins the action regardless of what the model picked.
const FORCE_POST_PHRASES: &[&str] = &[
    "create a new post",
    "make a post",
    "write a post",
    "post about",
    "introduce yourself",
    "share something",
];
const FORCE_COMMENT_PHRASES: &[&str] = &["comment on", "reply to"];

const MAX_REASON_CHARS: usize = 500;

/// Return the first balanced `{...}` object in `text`, ignoring braces in strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Default, Deserialize)]
struct RawDecision {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    target_post_id: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() && s.as_str() != "null" => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decision_from_keywords(lowered: &str) -> Decision {
    let contains_any = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));
    if contains_any(POST_MARKERS) {
        Decision::Post
    } else if contains_any(COMMENT_MARKERS) {
        Decision::Comment
    } else if contains_any(UPVOTE_MARKERS) {
        Decision::Upvote
    } else {
        Decision::Nothing
    }
}

fn forced_decision(context: Option<&str>) -> Option<Decision> {
    let context = context?.to_lowercase();
    if FORCE_POST_PHRASES.iter().any(|p| context.contains(p)) {
        Some(Decision::Post)
    } else if FORCE_COMMENT_PHRASES.iter().any(|p| context.contains(p)) {
        Some(Decision::Comment)
    } else {
        None
    }
}

/// Find the feed item a prose reply refers to, by id or by title.
fn mentioned_item<'a>(response: &str, feed: &'a [FeedItem]) -> Option<&'a FeedItem> {
    let lowered = response.to_lowercase();
    feed.iter()
        .find(|item| !item.id.is_empty() && response.contains(&item.id))
        .or_else(|| {
            feed.iter().find(|item| {
                let title = item.title.trim().to_lowercase();
                !title.is_empty() && lowered.contains(&title)
            })
        })
}

fn clip(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_REASON_CHARS) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

pub fn parse_decision(
    response: &str,
    feed: &[FeedItem],
    context: Option<&str>,
) -> Result<DecisionProposal, LlmError> {
    let raw = extract_json_object(response)
        .and_then(|json| serde_json::from_str::<RawDecision>(json).ok())
        .unwrap_or_default();

    let parsed = raw
        .action
        .as_deref()
        .and_then(|action| action.trim().to_lowercase().parse::<Decision>().ok());
    let decision = forced_decision(context)
        .or(parsed)
        .unwrap_or_else(|| decision_from_keywords(&response.to_lowercase()));

    let reason = raw
        .reason
        .filter(|reason| !reason.trim().is_empty())
        .map(|reason| clip(&reason))
        .unwrap_or_else(|| clip(response));

    if !decision.needs_target() {
        return Ok(DecisionProposal {
            decision,
            target_item_id: None,
            reason,
        });
    }

    let target = match raw.target_post_id.as_ref().and_then(id_from_value) {
        Some(id) => feed.iter().find(|item| item.id == id).ok_or_else(|| {
            LlmError::InvalidDecision {
                reason: format!("{} target '{}' is not in the observed feed", decision, id),
            }
        })?,
        None => mentioned_item(response, feed).ok_or_else(|| LlmError::InvalidDecision {
            reason: format!("{} decision did not name a post from the feed", decision),
        })?,
    };

    Ok(DecisionProposal {
        decision,
        target_item_id: Some(target.id.clone()),
        reason,
    })
}

/// Strip list bullets and markdown emphasis before matching a `Key:` prefix.
fn labelled<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let cleaned = line.trim_start_matches(|c: char| c == '*' || c == '#' || c == '-' || c.is_whitespace());
    let (key, rest) = cleaned.split_once(':')?;
    if key.trim_end_matches('*').trim().eq_ignore_ascii_case(label) {
        Some(rest.trim_start_matches('*').trim())
    } else {
        None
    }
}

fn unquote(text: &str) -> &str {
    text.trim().trim_matches('"').trim()
}

pub fn parse_post_draft(response: &str) -> Result<Draft, LlmError> {
    let mut title = None;
    let mut submolt = None;
    let mut content_lines: Vec<&str> = Vec::new();
    let mut saw_content_label = false;
    let mut unlabelled: Vec<&str> = Vec::new();

    for line in response.lines() {
        if let Some(value) = labelled(line, "title") {
            title = Some(unquote(value).to_string());
        } else if let Some(value) = labelled(line, "submolt") {
            let value = unquote(value).trim_start_matches("m/").to_lowercase();
            if !value.is_empty() {
                submolt = Some(value);
            }
        } else if let Some(value) = labelled(line, "content") {
            saw_content_label = true;
            content_lines.push(value);
        } else if saw_content_label {
            content_lines.push(line);
        } else {
            unlabelled.push(line);
        }
    }

    let body = if saw_content_label { content_lines } else { unlabelled };
    let content = body.join("\n").trim().to_string();
    if content.is_empty() {
        return Err(LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
        });
    }

    Ok(Draft::post(
        title.filter(|t| !t.is_empty()).unwrap_or_else(|| "Untitled".to_string()),
        content,
        submolt,
    ))
}

pub fn parse_comment_draft(response: &str) -> Result<Draft, LlmError> {
    let trimmed = response.trim();
    let text = trimmed
        .lines()
        .next()
        .and_then(|first| labelled(first, "comment"))
        .map(|first_line| {
            let rest: Vec<&str> = trimmed.lines().skip(1).collect();
            if rest.is_empty() {
                first_line.to_string()
            } else {
                format!("{}\n{}", first_line, rest.join("\n"))
            }
        })
        .unwrap_or_else(|| trimmed.to_string());

    let text = unquote(&text).to_string();
    if text.is_empty() {
        return Err(LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
        });
    }
    Ok(Draft::comment(text))
}

#[derive(Debug, Default, Deserialize)]
struct RawEvaluation {
    #[serde(default)]
    approved: Option<bool>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    issues: Vec<String>,
}

/// Read a number following `score` in prose such as `Score: 0.8`.
fn score_from_text(lowered: &str) -> Option<f64> {
    let index = lowered.find("score")?;
    let rest = lowered[index + "score".len()..]
        .trim_start_matches(|c: char| c == '"' || c == ':' || c == '=' || c.is_whitespace());
    let number: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse().ok()
}

pub fn parse_evaluation(response: &str, approval_threshold: f64) -> Result<Evaluation, LlmError> {
    let raw = match extract_json_object(response)
        .and_then(|json| serde_json::from_str::<RawEvaluation>(json).ok())
    {
        Some(raw) => raw,
        None => {
            let lowered = response.to_lowercase();
            let approved = ["approved: true", "\"approved\":true", "\"approved\": true"]
                .iter()
                .any(|signal| lowered.contains(signal))
                .then_some(true);
            RawEvaluation {
                approved,
                score: score_from_text(&lowered),
                issues: Vec::new(),
            }
        }
    };

    if raw.approved.is_none() && raw.score.is_none() {
        return Err(LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
        });
    }

    let score = raw.score.map(|score| score.clamp(0.0, 1.0));
    let accepted = raw.approved.unwrap_or(false)
        || score.map(|score| score >= approval_threshold).unwrap_or(false);

    let reason = if accepted {
        "approved".to_string()
    } else if !raw.issues.is_empty() {
        raw.issues.join("; ")
    } else {
        match score {
            Some(score) => format!("score {:.2} below threshold {:.2}", score, approval_threshold),
            None => "not approved".to_string(),
        }
    };

    Ok(Evaluation {
        accepted,
        reason,
        score,
    })
}

//! Thread summaries.
//!
//! The statistics (`participants`, `total_messages`, `first_ts`, `last_ts`)
//! are always computed deterministically from the index. `key_points` and
//! `action_items` come from an external LLM collaborator when one is wired
//! in and enabled; otherwise a deterministic markdown extraction runs, so
//! the operation is defined in every configuration.

use crate::Engine;
use crate::Result;
use chrono::NaiveDateTime;
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use super::message::{Message, MessageBmc};
use super::project::Project;

/// Cap on fallback bullet lists; threads can be long, summaries should not.
const MAX_POINTS: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub participants: Vec<String>,
    pub total_messages: usize,
    pub first_ts: Option<NaiveDateTime>,
    pub last_ts: Option<NaiveDateTime>,
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<ThreadExample>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadExample {
    pub from: String,
    pub subject: String,
    pub excerpt: String,
}

/// Snapshot handed to the external collaborator; taken from the index
/// before the call so the provider never holds engine resources.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadDigest {
    pub thread_id: String,
    pub model: String,
    pub messages: Vec<DigestMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestMessage {
    pub from: String,
    pub subject: String,
    pub body_md: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSummary {
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
}

/// Seam for LLM-backed summarization. Implementations may block; the engine
/// only calls this outside any project lock, on a snapshot of the thread.
pub trait SummaryProvider: Send + Sync {
    fn summarize(&self, digest: &ThreadDigest) -> Result<ProviderSummary>;
}

/// Summarize one thread of a project.
pub async fn summarize_thread(
    engine: &Engine,
    project: &Project,
    thread_id: &str,
    include_examples: bool,
) -> Result<ThreadSummary> {
    let messages = MessageBmc::list_thread(engine, project.id, thread_id).await?;

    let participants = collect_participants(engine, &messages).await?;
    let first_ts = messages.first().map(|m| m.created_ts);
    let last_ts = messages.last().map(|m| m.created_ts);

    let (key_points, action_items) = if engine.config.llm.enabled {
        match engine.summary_provider() {
            Some(provider) => {
                let digest = ThreadDigest {
                    thread_id: thread_id.to_string(),
                    model: engine.config.llm.default_model.clone(),
                    messages: messages
                        .iter()
                        .map(|m| DigestMessage {
                            from: m.sender_name.clone(),
                            subject: m.subject.clone(),
                            body_md: m.body_md.clone(),
                        })
                        .collect(),
                };
                match provider.summarize(&digest) {
                    Ok(summary) => (summary.key_points, summary.action_items),
                    Err(e) => {
                        warn!(thread = thread_id, error = %e, "summary provider failed, using fallback");
                        extract_fallback(&messages)
                    }
                }
            }
            None => extract_fallback(&messages),
        }
    } else {
        extract_fallback(&messages)
    };

    let examples = include_examples.then(|| {
        messages
            .iter()
            .take(3)
            .map(|m| ThreadExample {
                from: m.sender_name.clone(),
                subject: m.subject.clone(),
                excerpt: excerpt(&m.body_md, 200),
            })
            .collect()
    });

    Ok(ThreadSummary {
        thread_id: thread_id.to_string(),
        participants,
        total_messages: messages.len(),
        first_ts,
        last_ts,
        key_points,
        action_items,
        examples,
    })
}

/// Participants are message senders plus `to` recipients, sorted, deduped.
async fn collect_participants(engine: &Engine, messages: &[Message]) -> Result<Vec<String>> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    for message in messages {
        names.insert(message.sender_name.clone());
        for recipient in MessageBmc::recipients(engine, &message.id).await? {
            if matches!(recipient.kind, crate::types::RecipientKind::To) {
                names.insert(recipient.agent_name);
            }
        }
    }
    Ok(names.into_iter().collect())
}

/// Deterministic degraded output: markdown headings become key points,
/// unchecked task-list items and `TODO:` lines become action items.
fn extract_fallback(messages: &[Message]) -> (Vec<String>, Vec<String>) {
    let mut key_points = Vec::new();
    let mut action_items = Vec::new();

    for message in messages {
        for heading in extract_headings(&message.body_md) {
            if key_points.len() < MAX_POINTS && !key_points.contains(&heading) {
                key_points.push(heading);
            }
        }
        for line in message.body_md.lines() {
            let trimmed = line.trim();
            let item = if let Some(rest) = trimmed.strip_prefix("- [ ]") {
                Some(rest.trim().to_string())
            } else {
                trimmed
                    .find("TODO:")
                    .map(|idx| trimmed[idx + "TODO:".len()..].trim().to_string())
            };
            if let Some(item) = item {
                if !item.is_empty() && action_items.len() < MAX_POINTS && !action_items.contains(&item)
                {
                    action_items.push(item);
                }
            }
        }
    }

    (key_points, action_items)
}

fn extract_headings(body_md: &str) -> Vec<String> {
    let mut headings = Vec::new();
    let mut current: Option<String> = None;
    for event in Parser::new(body_md) {
        match event {
            Event::Start(Tag::Heading { .. }) => current = Some(String::new()),
            Event::Text(text) | Event::Code(text) => {
                if let Some(buf) = current.as_mut() {
                    buf.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(heading) = current.take() {
                    let heading = heading.trim().to_string();
                    if !heading.is_empty() {
                        headings.push(heading);
                    }
                }
            }
            _ => {}
        }
    }
    headings
}

fn excerpt(body_md: &str, max_chars: usize) -> String {
    let mut out: String = body_md.chars().take(max_chars).collect();
    if body_md.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

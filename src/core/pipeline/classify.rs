// src/core/pipeline/classify.rs

//! Message classification: command invocations, application responses and
//! plain user messages.
//!
//! Responses from application-type accounts are associated with the
//! invocation that caused them, either directly by interaction id or by a
//! composite key of channel and a 5-second time bucket. Pending
//! invocations live for a minute at most.

use crate::core::model::message::SourceMessage;
use crate::core::ttl_cache::TtlCache;
use chrono::{DateTime, Utc};

/// Width of the association time bucket.
const BUCKET_SECONDS: i64 = 5;

/// A command invocation awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command: String,
    pub invoker: String,
    pub channel_id: String,
    pub at: DateTime<Utc>,
}

/// What the pipeline decided a message is.
#[derive(Debug, Clone)]
pub enum MessageClass {
    /// A user invoking a command; replicated as-is and remembered.
    CommandInvocation { command: String },
    /// An application response, with the invocation when one matched.
    AppResponse { invoked_by: Option<PendingCommand> },
    Plain,
}

/// Composite association key: channel and the 5-second bucket the
/// timestamp falls into.
pub fn composite_key(channel_id: &str, ts: DateTime<Utc>) -> String {
    format!("{channel_id}:{}", ts.timestamp().div_euclid(BUCKET_SECONDS))
}

fn interaction_key(interaction_id: &str) -> String {
    format!("interaction:{interaction_id}")
}

/// Extracts the command name from an invocation's content ("/ban x" →
/// "ban").
fn command_name(content: &str) -> Option<String> {
    let rest = content.strip_prefix('/')?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

/// Classifies a message and maintains the pending-command table.
pub fn classify(message: &SourceMessage, pending: &TtlCache<String, PendingCommand>) -> MessageClass {
    if message.author.is_app || message.author.is_bot {
        // Direct interaction id wins; the time-bucket key is the fallback,
        // also checking the previous bucket for responses that straddle
        // the boundary.
        let invoked_by = message
            .interaction_id
            .as_deref()
            .and_then(|id| pending.remove(&interaction_key(id)))
            .or_else(|| pending.remove(&composite_key(&message.channel_id, message.timestamp)))
            .or_else(|| {
                let previous = message.timestamp - chrono::Duration::seconds(BUCKET_SECONDS);
                pending.remove(&composite_key(&message.channel_id, previous))
            });
        return MessageClass::AppResponse { invoked_by };
    }

    if let Some(command) = command_name(&message.content) {
        let entry = PendingCommand {
            command: command.clone(),
            invoker: message.author.username.clone(),
            channel_id: message.channel_id.clone(),
            at: message.timestamp,
        };
        pending.insert(
            composite_key(&message.channel_id, message.timestamp),
            entry.clone(),
        );
        if let Some(interaction_id) = &message.interaction_id {
            pending.insert(interaction_key(interaction_id), entry);
        }
        return MessageClass::CommandInvocation { command };
    }

    MessageClass::Plain
}

/// The prefix line rendered above an associated application response.
pub fn response_prefix(invocation: &PendingCommand) -> String {
    format!("**/{}** (by {})\n", invocation.command, invocation.invoker)
}

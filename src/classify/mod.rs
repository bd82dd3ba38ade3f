//! Decides what to do with one inbound event.
//!
//! `classify` is evaluated fresh for every event; the rule order is
//! precedence, not just filtering. The marker check must run first so the
//! bot can never reprocess its own replies, and owner commands must be
//! recognized before the non-audio rule or they would be dropped silently.

use crate::ingress::InboundEvent;
use crate::registry::ExclusionRegistry;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::warn;

/// Prefix of every transcript the bot posts. Loop prevention depends on
/// this exact string: an inbound message starting with it is always the
/// bot's own output, and genuine speech never starts with it (speech-to-
/// text output does not produce the leading asterisk formatting).
pub const TRANSCRIPT_MARKER: &str = "*Transcrição automática:*";

/// Prefix of every error notice the bot posts. Same contract as
/// [`TRANSCRIPT_MARKER`].
pub const ERROR_MARKER: &str = "Erro ao processar o áudio";

static COMMAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(exclude|include)\s+(\S+)\s*$").unwrap());

/// A parsed owner command mutating the exclusion list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionCommand {
    Exclude(String),
    Include(String),
}

impl ExclusionCommand {
    /// Parse `/exclude <id>` or `/include <id>`. Anything else is `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = COMMAND_RE.captures(text.trim())?;
        let id = caps[2].to_string();
        match &caps[1] {
            "exclude" => Some(Self::Exclude(id)),
            "include" => Some(Self::Include(id)),
            _ => None,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Exclude(id) | Self::Include(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event is one of the bot's own transcripts.
    SelfTranscript,
    /// The event is one of the bot's own error notices.
    SelfErrorNotice,
    /// Owner-issued exclusion command; the dispatcher executes it.
    OwnerCommand(ExclusionCommand),
    NonAudio,
    GroupMessage,
    ExcludedSender,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SelfTranscript => "self-origin transcript",
            Self::SelfErrorNotice => "self-origin error notice",
            Self::OwnerCommand(_) => "owner command",
            Self::NonAudio => "non-audio message",
            Self::GroupMessage => "group message",
            Self::ExcludedSender => "excluded sender",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Process,
    Ignore(IgnoreReason),
}

/// Map one inbound event to a verdict. First match wins.
///
/// A failed registry read is fail-closed: the sender cannot be proven
/// included, so the message is skipped. Exclusion is a privacy opt-out and
/// the engine must not transcribe past a broken opt-out list.
pub fn classify(event: &InboundEvent, registry: &ExclusionRegistry) -> Verdict {
    if let Some(text) = event.text.as_deref() {
        if text.starts_with(TRANSCRIPT_MARKER) {
            return Verdict::Ignore(IgnoreReason::SelfTranscript);
        }
        if text.starts_with(ERROR_MARKER) {
            return Verdict::Ignore(IgnoreReason::SelfErrorNotice);
        }
        if event.from_me {
            if let Some(cmd) = ExclusionCommand::parse(text) {
                return Verdict::Ignore(IgnoreReason::OwnerCommand(cmd));
            }
        }
    }

    if event.audio.is_none() {
        return Verdict::Ignore(IgnoreReason::NonAudio);
    }
    if event.is_group {
        return Verdict::Ignore(IgnoreReason::GroupMessage);
    }

    match registry.contains(&event.sender) {
        Ok(true) => Verdict::Ignore(IgnoreReason::ExcludedSender),
        Ok(false) => Verdict::Process,
        Err(e) => {
            warn!("exclusion store unreadable, skipping message: {e}");
            Verdict::Ignore(IgnoreReason::ExcludedSender)
        }
    }
}

/// Build the reply body for a finished transcription: the marker, a blank
/// line, and the transcript with leading whitespace stripped.
pub fn format_transcript(raw: &str) -> String {
    format!("{TRANSCRIPT_MARKER}\n\n{}", raw.trim_start())
}

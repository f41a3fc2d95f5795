use crate::def::Record;
use crate::remote::RawRecord;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Markup reduction rules, applied in order. Custom emoji, mention tags
    /// and URLs each collapse to a single placeholder character; formatting
    /// wrappers keep their inner text; quote markers vanish.
    static ref REDUCTIONS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"<a?:\w+:\d+>").unwrap(), "E"),
        (Regex::new(r"<[@#][!&]?\d+>").unwrap(), "M"),
        (Regex::new(r"https?://\S+").unwrap(), "U"),
        (Regex::new(r"```([\s\S]*?)```").unwrap(), "$1"),
        (Regex::new(r"`([^`]*)`").unwrap(), "$1"),
        (Regex::new(r"\|\|([\s\S]*?)\|\|").unwrap(), "$1"),
        (Regex::new(r"\*\*([^*]+)\*\*").unwrap(), "$1"),
        (Regex::new(r"\*([^*]+)\*").unwrap(), "$1"),
        // single-underscore italics reduce first, so `__u__` keeps one
        // underscore pair; the double-underscore rule then cleans up any
        // remaining full wrappers
        (Regex::new(r"_([^_]+)_").unwrap(), "$1"),
        (Regex::new(r"__([^_]+)__").unwrap(), "$1"),
        (Regex::new(r"~~([^~]+)~~").unwrap(), "$1"),
        (Regex::new(r"(?m)^>\s?").unwrap(), ""),
    ];
}

/// Number of characters that remain after stripping markup-like tokens and
/// spaces. Only the space character is removed; newlines and tabs still
/// count. Pure: the same text always yields the same length.
pub fn visible_content_len(content: &str) -> u32 {
    if content.is_empty() {
        return 0;
    }
    let mut s = content.to_string();
    for (pattern, replacement) in REDUCTIONS.iter() {
        s = pattern.replace_all(&s, *replacement).into_owned();
    }
    s.chars().filter(|c| *c != ' ').count() as u32
}

/// Converts a raw remote record into the canonical row shape. Total over the
/// documented raw shape: missing sub-resources were already defaulted during
/// deserialization. Display names are intentionally not resolved here; the
/// record carries `actor_id` only, so renames apply retroactively at read
/// time.
pub fn normalize(raw: &RawRecord) -> Record {
    // A reply link is only kept when both ends are known; a half-resolved
    // reference is worse than none for downstream reply graphs.
    let reply = raw.reference.as_ref().and_then(|r| match (r.record_id, r.actor_id) {
        (Some(record_id), Some(actor_id)) => Some((record_id, actor_id)),
        _ => None,
    });

    let mut mention_ids = raw.mentions.clone();
    mention_ids.sort_unstable();
    mention_ids.dedup();

    Record {
        id: raw.id,
        partition_id: raw.partition_id,
        actor_id: raw.actor.id,
        occurred_at: raw.occurred_at,
        edited_at: raw.edited_at,
        content_len: visible_content_len(&raw.content),
        attachments: raw.attachments.len() as u32,
        embeds: raw.embeds.len() as u32,
        reaction_count: raw.reactions.iter().map(|r| r.count).sum(),
        mention_ids,
        reply_to_id: reply.map(|(record_id, _)| record_id),
        reply_to_actor_id: reply.map(|(_, actor_id)| actor_id),
        thread_id: raw.thread_id,
        pinned: raw.pinned,
    }
}

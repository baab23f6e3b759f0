//! Directive extraction from free-form backend replies.
//!
//! The scanner walks the reply once, always picking the earliest opening tag
//! that is still ahead of the cursor. Anything it cannot make sense of
//! (unterminated tags, unparsable block ids, missing filename lines) is
//! dropped and scanning continues behind it.

use std::ops::Range;

use tracing::debug;

/// Marker that asks for a directive's result to be fed straight back.
pub const TOOL_CALL_MARKER: &str = "[TOOL_CALL]";

/// The four directive kinds recognised in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Edit,
    Run,
    Read,
    Patch,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 4] = [
        DirectiveKind::Edit,
        DirectiveKind::Run,
        DirectiveKind::Read,
        DirectiveKind::Patch,
    ];

    pub fn open_tag(self) -> &'static str {
        match self {
            DirectiveKind::Edit => "<EDIT>",
            DirectiveKind::Run => "<RUN>",
            DirectiveKind::Read => "<READ>",
            DirectiveKind::Patch => "<PATCH>",
        }
    }

    pub fn close_tag(self) -> &'static str {
        match self {
            DirectiveKind::Edit => "</EDIT>",
            DirectiveKind::Run => "</RUN>",
            DirectiveKind::Read => "</READ>",
            DirectiveKind::Patch => "</PATCH>",
        }
    }
}

/// Decoded payload of a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Overwrite or create `filename` with `content`.
    Edit { filename: String, content: String },
    /// Run `command` through the shell.
    Run { command: String },
    /// Return a block listing of `filename`.
    Read { filename: String },
    /// Replace block `block_id` of `filename`; empty `content` deletes it.
    Patch {
        filename: String,
        block_id: i64,
        content: String,
    },
}

impl Action {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Action::Edit { .. } => DirectiveKind::Edit,
            Action::Run { .. } => DirectiveKind::Run,
            Action::Read { .. } => DirectiveKind::Read,
            Action::Patch { .. } => DirectiveKind::Patch,
        }
    }
}

/// A directive located in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub action: Action,
    /// Byte range of the whole tagged region, open tag through close tag.
    pub span: Range<usize>,
    /// Preceded by [`TOOL_CALL_MARKER`].
    pub immediate: bool,
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        self.action.kind()
    }
}

/// Extract every well-formed directive from `text`, in reply order.
pub fn extract(text: &str) -> Vec<Directive> {
    let mut directives = Vec::new();
    let mut cursor = 0usize;

    while let Some((kind, start)) = next_open_tag(&text[cursor..]) {
        let rest = &text[cursor..];
        let immediate = rest[..start].trim().ends_with(TOOL_CALL_MARKER);
        let body_start = start + kind.open_tag().len();

        let Some(body_len) = rest[body_start..].find(kind.close_tag()) else {
            debug!(tag = kind.open_tag(), offset = cursor + start, "unterminated directive");
            cursor += body_start;
            continue;
        };
        let body_end = body_start + body_len;
        let span_end = body_end + kind.close_tag().len();

        match parse_payload(kind, &rest[body_start..body_end]) {
            Some(action) => directives.push(Directive {
                action,
                span: cursor + start..cursor + span_end,
                immediate,
            }),
            None => debug!(tag = kind.open_tag(), offset = cursor + start, "malformed directive"),
        }
        cursor += span_end;
    }

    directives
}

/// Earliest opening tag in `haystack`, with its byte offset.
fn next_open_tag(haystack: &str) -> Option<(DirectiveKind, usize)> {
    DirectiveKind::ALL
        .iter()
        .filter_map(|&kind| haystack.find(kind.open_tag()).map(|idx| (kind, idx)))
        .min_by_key(|&(_, idx)| idx)
}

fn parse_payload(kind: DirectiveKind, raw: &str) -> Option<Action> {
    let payload = raw.trim();
    match kind {
        DirectiveKind::Edit => {
            let (filename, content) = payload.split_once('\n')?;
            Some(Action::Edit {
                filename: filename.trim().to_string(),
                content: content.to_string(),
            })
        }
        DirectiveKind::Run => Some(Action::Run {
            command: payload.to_string(),
        }),
        DirectiveKind::Read => Some(Action::Read {
            filename: payload.to_string(),
        }),
        DirectiveKind::Patch => {
            let mut parts = payload.splitn(3, '\n');
            let filename = parts.next()?.trim();
            let block_id = parts.next()?.trim().parse::<i64>().ok()?;
            let content = parts.next().unwrap_or_default();
            Some(Action::Patch {
                filename: filename.to_string(),
                block_id,
                content: content.to_string(),
            })
        }
    }
}

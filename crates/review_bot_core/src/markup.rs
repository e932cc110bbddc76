//! crates/review_bot_core/src/markup.rs
//!
//! Transport-neutral description of the keyboards attached to outgoing messages.
//! Adapters translate these into whatever the messaging provider expects.

/// A button under a message that sends `data` back when pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// A button on the reply keyboard that sends its label as a text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyButton {
    pub text: String,
    /// When set, pressing the button shares the user's phone contact instead.
    pub request_contact: bool,
}

impl ReplyButton {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_contact: false,
        }
    }

    pub fn contact(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_contact: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    Inline(Vec<Vec<InlineButton>>),
    Reply {
        rows: Vec<Vec<ReplyButton>>,
        one_time: bool,
    },
    /// Hides a previously shown reply keyboard.
    RemoveReply,
}

impl Keyboard {
    /// Lays out `buttons` in rows whose lengths follow `widths`; the last width repeats.
    pub fn inline_adjusted(buttons: Vec<InlineButton>, widths: &[usize]) -> Self {
        Keyboard::Inline(adjust(buttons, widths))
    }

    pub fn reply_adjusted(buttons: Vec<ReplyButton>, widths: &[usize], one_time: bool) -> Self {
        Keyboard::Reply {
            rows: adjust(buttons, widths),
            one_time,
        }
    }

    /// Every callback payload carried by an inline keyboard.
    pub fn callback_data(&self) -> Vec<&str> {
        match self {
            Keyboard::Inline(rows) => rows.iter().flatten().map(|b| b.data.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

fn adjust<T>(buttons: Vec<T>, widths: &[usize]) -> Vec<Vec<T>> {
    let mut rows = Vec::new();
    let mut iter = buttons.into_iter().peekable();
    let mut width_index = 0;
    while iter.peek().is_some() {
        let width = widths
            .get(width_index)
            .or_else(|| widths.last())
            .copied()
            .unwrap_or(1)
            .max(1);
        rows.push(iter.by_ref().take(width).collect());
        width_index += 1;
    }
    rows
}

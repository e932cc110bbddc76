//! services/bot/src/bot/protocol.rs
//!
//! Defines the inbound message protocol: the subset of the Telegram Bot API `Update`
//! the bot consumes, the callback payloads carried by inline buttons, and the
//! transport-neutral `InboundEvent` the conversation engine works with.

use review_bot_core::{Locale, PhotoRef};
use serde::Deserialize;

//=========================================================================================
// Wire Types Sent FROM the Messaging Provider
//=========================================================================================

#[derive(Deserialize, Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<TgUser>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub media_group_id: Option<String>,
    pub contact: Option<Contact>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TgUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Chat {
    pub id: i64,
}

/// One resolution of an uploaded photo. The provider offers several per photo.
#[derive(Deserialize, Debug, Clone)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Contact {
    pub phone_number: String,
    pub user_id: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TgUser,
    pub message: Option<CallbackMessage>,
    pub data: Option<String>,
}

/// The message a pressed button was attached to; only its chat matters here.
#[derive(Deserialize, Debug, Clone)]
pub struct CallbackMessage {
    pub chat: Chat,
}

/// Picks the single largest resolution offered for a photo.
pub fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes.iter().max_by_key(|s| {
        (
            u64::from(s.width) * u64::from(s.height),
            s.file_size.unwrap_or(0),
        )
    })
}

//=========================================================================================
// Inline Button Payloads
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Lang(Locale),
    Branch(i64),
    AddRating,
    /// Raw value; range checking is the engine's job.
    Rate(i64),
    AddText,
    AddPhoto,
    Submit,
    BackToBranches,
    BackToMenu,
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            CallbackAction::Lang(locale) => format!("lang:{}", locale.code()),
            CallbackAction::Branch(id) => format!("branch:{}", id),
            CallbackAction::AddRating => "add_rating".to_string(),
            CallbackAction::Rate(value) => format!("rate:{}", value),
            CallbackAction::AddText => "add_text".to_string(),
            CallbackAction::AddPhoto => "add_photo".to_string(),
            CallbackAction::Submit => "submit_review".to_string(),
            CallbackAction::BackToBranches => "go_back_choose_branch".to_string(),
            CallbackAction::BackToMenu => "go_back_choose_review".to_string(),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "add_rating" => return Some(CallbackAction::AddRating),
            "add_text" => return Some(CallbackAction::AddText),
            "add_photo" => return Some(CallbackAction::AddPhoto),
            "submit_review" => return Some(CallbackAction::Submit),
            "go_back_choose_branch" => return Some(CallbackAction::BackToBranches),
            "go_back_choose_review" => return Some(CallbackAction::BackToMenu),
            _ => {}
        }
        let (prefix, value) = data.split_once(':')?;
        match prefix {
            "lang" => Locale::from_code(value).map(CallbackAction::Lang),
            "branch" => value.parse().ok().map(CallbackAction::Branch),
            "rate" => value.parse().ok().map(CallbackAction::Rate),
            _ => None,
        }
    }
}

//=========================================================================================
// Slash Commands
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    NewReview,
    Admin,
    SuperAdmin,
    AddAdmin,
    RemoveAdmin,
    SetGroup,
    AddBranch,
    RenameBranch,
    DeleteBranch,
    Users,
    Reviews,
    EditReview,
    DeleteReview,
}

impl BotCommand {
    /// Splits `/name@bot args` into the command and its trimmed argument string.
    pub fn parse(text: &str) -> Option<(Self, String)> {
        let rest = text.trim().strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        let command = match name.as_str() {
            "start" => BotCommand::Start,
            "new_review" | "yangi_sharh" | "novyy_otzyv" => BotCommand::NewReview,
            "admin" => BotCommand::Admin,
            "superadmin" => BotCommand::SuperAdmin,
            "add_admin" => BotCommand::AddAdmin,
            "remove_admin" => BotCommand::RemoveAdmin,
            "set_group" => BotCommand::SetGroup,
            "add_branch" => BotCommand::AddBranch,
            "rename_branch" => BotCommand::RenameBranch,
            "delete_branch" => BotCommand::DeleteBranch,
            "users" => BotCommand::Users,
            "reviews" => BotCommand::Reviews,
            "edit_review" => BotCommand::EditReview,
            "delete_review" => BotCommand::DeleteReview,
            _ => return None,
        };
        Some((command, args.to_string()))
    }
}

//=========================================================================================
// Transport-Neutral Events
//=========================================================================================

/// The identity an event is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub tg_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<&TgUser> for Sender {
    fn from(user: &TgUser) -> Self {
        Self {
            tg_id: user.id,
            first_name: Some(user.first_name.clone()),
            last_name: user.last_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Command {
        command: BotCommand,
        args: String,
    },
    Text(String),
    Photo {
        photo: PhotoRef,
        caption: Option<String>,
        media_group_id: Option<String>,
    },
    /// A burst of grouped photos consolidated by the media aggregator, in arrival order.
    PhotoGroup {
        photos: Vec<PhotoRef>,
        caption: Option<String>,
    },
    Contact {
        phone: String,
        user_id: Option<i64>,
    },
    /// A button press. `action` is `None` for payloads the bot does not understand.
    Callback {
        id: String,
        action: Option<CallbackAction>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub sender: Sender,
    pub chat_id: i64,
    pub kind: EventKind,
}

impl InboundEvent {
    /// Converts a provider update into an event; updates the bot does not handle yield `None`.
    pub fn from_update(update: Update) -> Option<Self> {
        if let Some(query) = update.callback_query {
            let chat_id = query
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(query.from.id);
            let action = query.data.as_deref().and_then(CallbackAction::parse);
            return Some(Self {
                sender: Sender::from(&query.from),
                chat_id,
                kind: EventKind::Callback {
                    id: query.id,
                    action,
                },
            });
        }

        let message = update.message?;
        let sender = Sender::from(message.from.as_ref()?);
        let chat_id = message.chat.id;

        let kind = if let Some(sizes) = message.photo.as_deref() {
            let best = largest_photo(sizes)?;
            EventKind::Photo {
                photo: PhotoRef::new(best.file_id.clone()),
                caption: message.caption.clone(),
                media_group_id: message.media_group_id.clone(),
            }
        } else if let Some(contact) = message.contact {
            EventKind::Contact {
                phone: contact.phone_number,
                user_id: contact.user_id,
            }
        } else {
            let text = message.text?;
            match BotCommand::parse(&text) {
                Some((command, args)) => EventKind::Command { command, args },
                None => EventKind::Text(text),
            }
        };

        Some(Self {
            sender,
            chat_id,
            kind,
        })
    }

    /// The correlation id of a grouped photo, if this event is one.
    pub fn media_group_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Photo {
                media_group_id: Some(id),
                ..
            } => Some(id),
            _ => None,
        }
    }
}

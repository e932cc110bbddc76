pub mod admin;
pub mod dispatcher;
pub mod engine;
pub mod media_group;
pub mod middleware;
pub mod notify;
pub mod protocol;
pub mod state;
pub mod webhook;

// Re-export what the binary needs to assemble the bot.
pub use dispatcher::Dispatcher;
pub use engine::ConversationEngine;
pub use webhook::{create_router, WebhookState};

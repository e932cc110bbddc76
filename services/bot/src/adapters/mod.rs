pub mod db;
pub mod telegram;

pub use db::DbAdapter;
pub use telegram::TelegramAdapter;

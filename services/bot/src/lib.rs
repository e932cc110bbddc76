pub mod adapters;
pub mod bot;
pub mod config;
pub mod error;
pub mod i18n;
pub mod keyboards;

#[cfg(test)]
mod testing;

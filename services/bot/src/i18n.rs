//! services/bot/src/i18n.rs
//!
//! Localized string tables. The tables are compiled into the binary and looked up
//! by key; missing keys fall back to the default locale and then to the key itself.

use std::collections::HashMap;

use review_bot_core::Locale;

const UZ: &str = include_str!("../locales/uz.json");
const RU: &str = include_str!("../locales/ru.json");

#[derive(Debug, Clone)]
pub struct I18n {
    tables: HashMap<Locale, HashMap<String, String>>,
    fallback: Locale,
}

impl I18n {
    /// Parses the embedded tables.
    pub fn embedded(fallback: Locale) -> Result<Self, serde_json::Error> {
        let mut tables = HashMap::new();
        tables.insert(Locale::Uz, serde_json::from_str(UZ)?);
        tables.insert(Locale::Ru, serde_json::from_str(RU)?);
        Ok(Self { tables, fallback })
    }

    pub fn t<'a>(&'a self, locale: Locale, key: &'a str) -> &'a str {
        self.lookup(locale, key)
            .or_else(|| self.lookup(self.fallback, key))
            .unwrap_or(key)
    }

    /// Looks up `key` and substitutes every `{name}` placeholder from `args`.
    pub fn format(&self, locale: Locale, key: &str, args: &[(&str, &str)]) -> String {
        let mut text = self.t(locale, key).to_string();
        for (name, value) in args {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        text
    }

    pub fn fallback(&self) -> Locale {
        self.fallback
    }

    /// The locale whose `key` entry equals `text`, if any.
    pub fn match_label(&self, key: &str, text: &str) -> Option<Locale> {
        let text = text.trim();
        Locale::ALL
            .into_iter()
            .find(|locale| self.lookup(*locale, key) == Some(text))
    }

    fn lookup(&self, locale: Locale, key: &str) -> Option<&str> {
        self.tables
            .get(&locale)
            .and_then(|table| table.get(key))
            .map(String::as_str)
    }
}

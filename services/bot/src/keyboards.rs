//! services/bot/src/keyboards.rs
//!
//! Builders for every keyboard the conversation shows.

use review_bot_core::{Branch, InlineButton, Keyboard, Locale, Rating, ReplyButton};

use crate::bot::protocol::CallbackAction;
use crate::i18n::I18n;

fn button(text: impl Into<String>, action: CallbackAction) -> InlineButton {
    InlineButton::new(text, action.encode())
}

pub fn lang_kb(i18n: &I18n, locale: Locale) -> Keyboard {
    let buttons = Locale::ALL
        .into_iter()
        .map(|l| {
            let key = match l {
                Locale::Uz => "lang.uz",
                Locale::Ru => "lang.ru",
            };
            button(i18n.t(locale, key), CallbackAction::Lang(l))
        })
        .collect();
    Keyboard::inline_adjusted(buttons, &[2])
}

pub fn contact_kb(i18n: &I18n, locale: Locale) -> Keyboard {
    Keyboard::reply_adjusted(vec![ReplyButton::contact(i18n.t(locale, "kb.contact"))], &[1], true)
}

pub fn branches_kb(branches: &[Branch], locale: Locale) -> Keyboard {
    let buttons = branches
        .iter()
        .map(|b| button(b.name(locale), CallbackAction::Branch(b.id)))
        .collect();
    Keyboard::inline_adjusted(buttons, &[1])
}

/// The review menu. The submit button only appears once the draft can be submitted.
pub fn review_menu_kb(i18n: &I18n, locale: Locale, can_submit: bool) -> Keyboard {
    let mut buttons = vec![
        button(i18n.t(locale, "btn.add_rating"), CallbackAction::AddRating),
        button(i18n.t(locale, "btn.add_text"), CallbackAction::AddText),
        button(i18n.t(locale, "btn.add_photo"), CallbackAction::AddPhoto),
    ];
    if can_submit {
        buttons.push(button(i18n.t(locale, "btn.submit"), CallbackAction::Submit));
    }
    buttons.push(button(
        i18n.t(locale, "common.kb.back"),
        CallbackAction::BackToBranches,
    ));
    Keyboard::inline_adjusted(buttons, &[2, 2, 1])
}

pub fn back_to_review_menu_kb(i18n: &I18n, locale: Locale) -> Keyboard {
    Keyboard::inline_adjusted(
        vec![button(i18n.t(locale, "common.kb.back"), CallbackAction::BackToMenu)],
        &[1],
    )
}

pub fn rating_kb(i18n: &I18n, locale: Locale) -> Keyboard {
    let stars: Vec<InlineButton> = (Rating::MIN..=Rating::MAX)
        .map(|v| button(format!("{} ⭐", v), CallbackAction::Rate(i64::from(v))))
        .collect();
    let back = button(i18n.t(locale, "common.kb.back"), CallbackAction::BackToMenu);
    Keyboard::Inline(vec![stars, vec![back]])
}

pub fn new_review_kb(i18n: &I18n, locale: Locale) -> Keyboard {
    Keyboard::reply_adjusted(
        vec![
            ReplyButton::text(i18n.t(locale, "kb.new_review")),
            ReplyButton::text(i18n.t(locale, "kb.change_lang")),
        ],
        &[2],
        false,
    )
}

/// The command menu for one client language, as `(command, description)` pairs.
/// Without a locale the generic `new_review` alias is advertised.
pub fn command_menu(i18n: &I18n, locale: Option<Locale>) -> Vec<(&'static str, String)> {
    let (lang, new_review) = match locale {
        None => (i18n.fallback(), "new_review"),
        Some(Locale::Uz) => (Locale::Uz, "yangi_sharh"),
        Some(Locale::Ru) => (Locale::Ru, "novyy_otzyv"),
    };
    vec![
        ("start", i18n.t(lang, "cmd.start").to_string()),
        (new_review, i18n.t(lang, "cmd.new_review").to_string()),
        ("admin", i18n.t(lang, "cmd.admin").to_string()),
        ("superadmin", i18n.t(lang, "cmd.superadmin").to_string()),
    ]
}

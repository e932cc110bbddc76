//! services/bot/src/bot/admin.rs
//!
//! Privileged operations. Every operation asks the authorizer once, up front, and
//! reports its result as an `AdminOutcome` rather than through errors.

use review_bot_core::{
    AccessLevel, AdminRole, Locale, NewBranch, PortError, PortResult, Rating, SubmissionDetails,
    User,
};
use tracing::info;

use crate::bot::notify::{escape_html, truncate_chars};
use crate::bot::protocol::BotCommand;
use crate::bot::state::AppState;

const USERS_PAGE_SIZE: i64 = 50;
const REVIEWS_PAGE_SIZE: i64 = 10;
/// Review text shown per row of the `/reviews` listing.
const LISTED_TEXT_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    /// The operation ran; the text is the localized report for the caller.
    Done(String),
    NotFound,
    Unauthorized,
    /// The arguments did not parse; carries the expected usage.
    Invalid(&'static str),
}

/// The access level each privileged command requires.
pub fn required_level(command: BotCommand) -> Option<AccessLevel> {
    match command {
        BotCommand::Admin
        | BotCommand::AddBranch
        | BotCommand::RenameBranch
        | BotCommand::DeleteBranch
        | BotCommand::Users
        | BotCommand::Reviews
        | BotCommand::EditReview
        | BotCommand::DeleteReview => Some(AccessLevel::Admin),
        BotCommand::SuperAdmin
        | BotCommand::AddAdmin
        | BotCommand::RemoveAdmin
        | BotCommand::SetGroup => Some(AccessLevel::SuperAdmin),
        BotCommand::Start | BotCommand::NewReview => None,
    }
}

/// Runs a privileged command for `caller`, issued from `chat_id`.
pub async fn execute(
    state: &AppState,
    caller: i64,
    chat_id: i64,
    command: BotCommand,
    args: &str,
    locale: Locale,
) -> PortResult<AdminOutcome> {
    let Some(level) = required_level(command) else {
        return Ok(AdminOutcome::Unauthorized);
    };
    if !state
        .authorizer
        .is_privileged(state.db.as_ref(), caller, level)
        .await?
    {
        info!("Denied {:?} for {}.", command, caller);
        return Ok(AdminOutcome::Unauthorized);
    }

    let i18n = &state.i18n;
    let db = &state.db;
    match command {
        BotCommand::Admin => {
            let stats = db.branch_stats().await?;
            let users = db.count_users().await?;
            let reviews = db.count_submissions().await?;

            let mut text = i18n.t(locale, "admin.stats.header").to_string();
            for s in &stats {
                let avg = s
                    .avg_rating
                    .map(|a| format!("{:.2}", a))
                    .unwrap_or_else(|| "-".to_string());
                let count = s.reviews_count.to_string();
                text.push('\n');
                text.push_str(&i18n.format(
                    locale,
                    "admin.stats.row",
                    &[
                        ("name", s.branch.name(locale)),
                        ("count", count.as_str()),
                        ("avg", avg.as_str()),
                    ],
                ));
            }
            text.push_str("\n\n");
            text.push_str(&i18n.format(
                locale,
                "admin.stats.totals",
                &[
                    ("users", users.to_string().as_str()),
                    ("reviews", reviews.to_string().as_str()),
                ],
            ));
            Ok(AdminOutcome::Done(text))
        }
        BotCommand::SuperAdmin => {
            let admins = db.list_admins().await?;
            let mut text = i18n.t(locale, "superadmin.header").to_string();
            for id in state.authorizer.configured_super_admins() {
                text.push_str(&format!("\n• {} (super_admin, env)", id));
            }
            for admin in admins
                .iter()
                .filter(|a| !state.authorizer.is_configured_super_admin(a.tg_id))
            {
                let group = admin
                    .group_id
                    .map(|g| format!(", chat {}", g))
                    .unwrap_or_default();
                text.push_str(&format!("\n• {} ({}{})", admin.tg_id, admin.role.as_str(), group));
            }
            text.push_str("\n\n");
            text.push_str(i18n.t(locale, "superadmin.commands"));
            Ok(AdminOutcome::Done(text))
        }
        BotCommand::AddAdmin => {
            const USAGE: &str = "/add_admin <id> [super]";
            let mut parts = args.split_whitespace();
            let Some(tg_id) = parts.next().and_then(|p| p.parse::<i64>().ok()) else {
                return Ok(AdminOutcome::Invalid(USAGE));
            };
            let role = match parts.next() {
                None => AdminRole::Admin,
                Some("super") => AdminRole::SuperAdmin,
                Some(_) => return Ok(AdminOutcome::Invalid(USAGE)),
            };
            let admin = db.add_admin(tg_id, role).await?;
            info!("{} granted {} to {}.", caller, admin.role.as_str(), tg_id);
            Ok(AdminOutcome::Done(i18n.format(
                locale,
                "admin.admin_added",
                &[("id", tg_id.to_string().as_str()), ("role", admin.role.as_str())],
            )))
        }
        BotCommand::RemoveAdmin => {
            let Some(tg_id) = parse_id(args) else {
                return Ok(AdminOutcome::Invalid("/remove_admin <id>"));
            };
            // Configured super admins have no removable record.
            if state.authorizer.is_configured_super_admin(tg_id) || !db.remove_admin(tg_id).await? {
                return Ok(AdminOutcome::NotFound);
            }
            info!("{} removed admin {}.", caller, tg_id);
            Ok(AdminOutcome::Done(i18n.format(
                locale,
                "admin.admin_removed",
                &[("id", tg_id.to_string().as_str())],
            )))
        }
        BotCommand::SetGroup => {
            db.set_notification_channel(caller, chat_id, AdminRole::SuperAdmin)
                .await?;
            info!("Notifications for {} now go to chat {}.", caller, chat_id);
            Ok(AdminOutcome::Done(i18n.t(locale, "admin.group_bound").to_string()))
        }
        BotCommand::AddBranch => {
            let Some(names) = parse_names(args) else {
                return Ok(AdminOutcome::Invalid("/add_branch <name_uz> | <name_ru>"));
            };
            let branch = db.create_branch(names).await?;
            Ok(AdminOutcome::Done(i18n.format(
                locale,
                "admin.branch_added",
                &[("id", branch.id.to_string().as_str()), ("name", branch.name(locale))],
            )))
        }
        BotCommand::RenameBranch => {
            const USAGE: &str = "/rename_branch <id> <name_uz> | <name_ru>";
            let Some((id, rest)) = args.split_once(char::is_whitespace) else {
                return Ok(AdminOutcome::Invalid(USAGE));
            };
            let (Some(branch_id), Some(names)) = (parse_id(id), parse_names(rest)) else {
                return Ok(AdminOutcome::Invalid(USAGE));
            };
            match db.update_branch(branch_id, names).await {
                Ok(branch) => Ok(AdminOutcome::Done(i18n.format(
                    locale,
                    "admin.branch_renamed",
                    &[("id", branch.id.to_string().as_str()), ("name", branch.name(locale))],
                ))),
                Err(PortError::NotFound(_)) => Ok(AdminOutcome::NotFound),
                Err(e) => Err(e),
            }
        }
        BotCommand::DeleteBranch => {
            let Some(branch_id) = parse_id(args) else {
                return Ok(AdminOutcome::Invalid("/delete_branch <id>"));
            };
            if !db.delete_branch(branch_id).await? {
                return Ok(AdminOutcome::NotFound);
            }
            Ok(AdminOutcome::Done(i18n.format(
                locale,
                "admin.branch_deleted",
                &[("id", branch_id.to_string().as_str())],
            )))
        }
        BotCommand::Users => {
            let Some(page) = parse_page(args) else {
                return Ok(AdminOutcome::Invalid("/users [page]"));
            };
            let users = db
                .list_users(USERS_PAGE_SIZE, (page - 1) * USERS_PAGE_SIZE)
                .await?;
            if users.is_empty() {
                return Ok(AdminOutcome::Done(i18n.t(locale, "admin.users.empty").to_string()));
            }
            let mut text = i18n.format(
                locale,
                "admin.users.header",
                &[("page", page.to_string().as_str())],
            );
            for user in &users {
                text.push('\n');
                text.push_str(&user_row(user));
            }
            Ok(AdminOutcome::Done(text))
        }
        BotCommand::Reviews => {
            let Some(page) = parse_page(args) else {
                return Ok(AdminOutcome::Invalid("/reviews [page]"));
            };
            let reviews = db
                .list_submissions(REVIEWS_PAGE_SIZE, (page - 1) * REVIEWS_PAGE_SIZE)
                .await?;
            if reviews.is_empty() {
                return Ok(AdminOutcome::Done(i18n.t(locale, "admin.reviews.empty").to_string()));
            }
            let mut text = i18n.format(
                locale,
                "admin.reviews.header",
                &[("page", page.to_string().as_str())],
            );
            for review in &reviews {
                text.push_str("\n\n");
                text.push_str(&review_row(review, locale));
            }
            Ok(AdminOutcome::Done(text))
        }
        BotCommand::EditReview => {
            let Some((review_id, rating, new_text)) = parse_review_edit(args) else {
                return Ok(AdminOutcome::Invalid(
                    "/edit_review <id> rating=<1-5> text=<text>",
                ));
            };
            match db
                .update_submission(review_id, rating, new_text.as_deref())
                .await
            {
                Ok(review) => {
                    info!("{} edited review #{}.", caller, review.id);
                    Ok(AdminOutcome::Done(i18n.format(
                        locale,
                        "admin.review_updated",
                        &[("id", review.id.to_string().as_str())],
                    )))
                }
                Err(PortError::NotFound(_)) => Ok(AdminOutcome::NotFound),
                Err(e) => Err(e),
            }
        }
        BotCommand::DeleteReview => {
            let Some(review_id) = parse_id(args) else {
                return Ok(AdminOutcome::Invalid("/delete_review <id>"));
            };
            if !db.delete_submission(review_id).await? {
                return Ok(AdminOutcome::NotFound);
            }
            info!("{} deleted review #{}.", caller, review_id);
            Ok(AdminOutcome::Done(i18n.format(
                locale,
                "admin.review_deleted",
                &[("id", review_id.to_string().as_str())],
            )))
        }
        BotCommand::Start | BotCommand::NewReview => Ok(AdminOutcome::Unauthorized),
    }
}

fn user_row(user: &User) -> String {
    format!(
        "• {} {} {} ({})",
        user.tg_id,
        escape_html(&user.display_name().unwrap_or_default()),
        user.phone.as_deref().map(escape_html).unwrap_or_else(|| "-".to_string()),
        user.locale.code(),
    )
}

fn review_row(details: &SubmissionDetails, locale: Locale) -> String {
    let review = &details.submission;
    let rating = review
        .rating
        .map(|r| r.value().to_string())
        .unwrap_or_else(|| "-".to_string());
    let branch = details
        .branch
        .as_ref()
        .map(|b| escape_html(b.name(locale)))
        .unwrap_or_else(|| "-".to_string());
    let author = details
        .user
        .as_ref()
        .map(|u| {
            let name = u.display_name().unwrap_or_else(|| u.tg_id.to_string());
            let phone = u.phone.as_deref().unwrap_or("-");
            escape_html(&format!("{} {}", name, phone))
        })
        .unwrap_or_else(|| "-".to_string());
    let text = review
        .text
        .as_deref()
        .map(|t| escape_html(&truncate_chars(t, LISTED_TEXT_LIMIT)))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "#{} | ⭐ {} | 📍 {} | 👤 {} | 📷 {}\n💬 {}",
        review.id,
        rating,
        branch,
        author,
        review.photos.len(),
        text,
    )
}

/// A 1-based page number; empty means the first page.
fn parse_page(raw: &str) -> Option<i64> {
    if raw.trim().is_empty() {
        return Some(1);
    }
    parse_id(raw).filter(|page| *page >= 1)
}

/// `<id> [rating=<n>] [text=<rest of line>]`, with at least one field given.
fn parse_review_edit(raw: &str) -> Option<(i64, Option<Rating>, Option<String>)> {
    let raw = raw.trim();
    let (id, mut rest) = raw.split_once(char::is_whitespace)?;
    let review_id = parse_id(id)?;
    let mut rating = None;
    let mut text = None;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(value) = rest.strip_prefix("text=") {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            text = Some(value.to_string());
            break;
        }
        let value = rest.strip_prefix("rating=")?;
        let (number, tail) = value
            .split_once(char::is_whitespace)
            .unwrap_or((value, ""));
        rating = Some(Rating::new(number.parse().ok()?)?);
        rest = tail;
    }

    if rating.is_none() && text.is_none() {
        return None;
    }
    Some((review_id, rating, text))
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// `"<uz> | <ru>"`; a single name is used for both locales.
fn parse_names(raw: &str) -> Option<NewBranch> {
    let (uz, ru) = match raw.split_once('|') {
        Some((uz, ru)) => (uz.trim(), ru.trim()),
        None => (raw.trim(), raw.trim()),
    };
    if uz.is_empty() || ru.is_empty() {
        return None;
    }
    Some(NewBranch {
        name_uz: uz.to_string(),
        name_ru: ru.to_string(),
    })
}

//! services/bot/src/bot/notify.rs
//!
//! Relays a committed review to the chats bound to privileged identities.
//!
//! Delivery is best effort: every failure is logged and swallowed here, so nothing
//! that happens during notification can touch the already persisted review.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::FixedOffset;
use review_bot_core::{
    AdminRole, DatabaseService, Locale, MessagingService, PortResult, SubmissionDetails,
};
use tracing::{error, info, warn};

use crate::i18n::I18n;

/// Longest review text put into a photo caption; the provider caps captions.
const CAPTION_TEXT_LIMIT: usize = 700;
/// Longest review text put into a plain message, leaving room for the header
/// under the provider's 4096 character cap.
const MESSAGE_TEXT_LIMIT: usize = 3500;

/// How a notification is rendered, chosen from the number of photos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryShape {
    Text,
    Photo,
    Gallery,
}

impl DeliveryShape {
    pub fn for_photo_count(count: usize) -> Self {
        match count {
            0 => DeliveryShape::Text,
            1 => DeliveryShape::Photo,
            _ => DeliveryShape::Gallery,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered { chat_id: i64, shape: DeliveryShape },
    NoRecipient,
    /// Another owner already received this review in the same chat.
    Duplicate,
    Failed,
}

#[derive(Clone)]
pub struct Notifier {
    db: Arc<dyn DatabaseService>,
    messenger: Arc<dyn MessagingService>,
    i18n: Arc<I18n>,
    utc_offset: FixedOffset,
    default_locale: Locale,
}

impl Notifier {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        messenger: Arc<dyn MessagingService>,
        i18n: Arc<I18n>,
        utc_offset: FixedOffset,
        default_locale: Locale,
    ) -> Self {
        Self {
            db,
            messenger,
            i18n,
            utc_offset,
            default_locale,
        }
    }

    /// Notifies one owner about a submission.
    pub async fn notify(&self, owner_tg_id: i64, submission_id: i64) -> NotifyOutcome {
        self.notify_owners(&[owner_tg_id], submission_id)
            .await
            .pop()
            .unwrap_or(NotifyOutcome::NoRecipient)
    }

    /// Every owner whose bound chat should hear about new reviews: the configured
    /// super admins plus the persisted ones, sorted and deduplicated.
    pub async fn recipients(&self, configured: &[i64]) -> Vec<i64> {
        let mut owners = configured.to_vec();
        match self.db.list_admins().await {
            Ok(admins) => owners.extend(
                admins
                    .into_iter()
                    .filter(|a| a.role == AdminRole::SuperAdmin)
                    .map(|a| a.tg_id),
            ),
            Err(e) => error!("Failed to list persisted super admins: {}", e),
        }
        owners.sort_unstable();
        owners.dedup();
        owners
    }

    /// Notifies every owner, delivering at most once to each distinct chat.
    pub async fn notify_owners(&self, owners: &[i64], submission_id: i64) -> Vec<NotifyOutcome> {
        let mut delivered: HashSet<i64> = HashSet::new();
        let mut outcomes = Vec::with_capacity(owners.len());

        for &owner in owners {
            let chat_id = match self.db.resolve_notification_channel(owner).await {
                Ok(Some(chat_id)) => chat_id,
                Ok(None) => {
                    warn!("No notification chat bound for owner {}; skipping.", owner);
                    outcomes.push(NotifyOutcome::NoRecipient);
                    continue;
                }
                Err(e) => {
                    error!("Failed to resolve notification chat for owner {}: {}", owner, e);
                    outcomes.push(NotifyOutcome::Failed);
                    continue;
                }
            };
            if !delivered.insert(chat_id) {
                outcomes.push(NotifyOutcome::Duplicate);
                continue;
            }

            let locale = self.owner_locale(owner).await;
            let outcome = match self.deliver(chat_id, locale, submission_id).await {
                Ok(shape) => {
                    info!(
                        "Review #{} delivered to chat {} as {:?}.",
                        submission_id, chat_id, shape
                    );
                    NotifyOutcome::Delivered { chat_id, shape }
                }
                Err(e) => {
                    error!(
                        "Failed to deliver review #{} to chat {}: {}",
                        submission_id, chat_id, e
                    );
                    NotifyOutcome::Failed
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn owner_locale(&self, owner: i64) -> Locale {
        self.db
            .get_user_locale(owner)
            .await
            .unwrap_or(self.default_locale)
    }

    async fn deliver(
        &self,
        chat_id: i64,
        locale: Locale,
        submission_id: i64,
    ) -> PortResult<DeliveryShape> {
        // Re-read so the caption reflects one consistent snapshot of the committed rows.
        let details = self.db.fetch_submission_with_relations(submission_id).await?;
        let photos = &details.submission.photos;
        let shape = DeliveryShape::for_photo_count(photos.len());

        match shape {
            DeliveryShape::Text => {
                let caption = render_caption(
                    &self.i18n,
                    locale,
                    &details,
                    self.utc_offset,
                    Some(MESSAGE_TEXT_LIMIT),
                );
                self.messenger.send_text(chat_id, &caption, None).await?;
            }
            DeliveryShape::Photo => {
                let caption = render_caption(
                    &self.i18n,
                    locale,
                    &details,
                    self.utc_offset,
                    Some(CAPTION_TEXT_LIMIT),
                );
                self.messenger
                    .send_photo(chat_id, &photos[0], Some(&caption), None)
                    .await?;
            }
            DeliveryShape::Gallery => {
                let caption = render_caption(
                    &self.i18n,
                    locale,
                    &details,
                    self.utc_offset,
                    Some(CAPTION_TEXT_LIMIT),
                );
                self.messenger
                    .send_photo_gallery(chat_id, photos, Some(&caption))
                    .await?;
            }
        }
        Ok(shape)
    }
}

/// Builds the HTML caption announcing a review.
pub fn render_caption(
    i18n: &I18n,
    locale: Locale,
    details: &SubmissionDetails,
    utc_offset: FixedOffset,
    text_limit: Option<usize>,
) -> String {
    let submission = &details.submission;
    let placeholder = "-";

    let rating = submission
        .rating
        .map(|r| r.value().to_string())
        .unwrap_or_else(|| placeholder.to_string());

    let (who, phone) = match &details.user {
        Some(user) => {
            let name = user
                .display_name()
                .unwrap_or_else(|| i18n.t(locale, "notify.user").to_string());
            let link = format!(
                "<a href=\"tg://user?id={}\">{}</a>",
                user.tg_id,
                escape_html(&name)
            );
            let phone = user
                .phone
                .as_deref()
                .map(escape_html)
                .unwrap_or_else(|| placeholder.to_string());
            (link, phone)
        }
        None => (placeholder.to_string(), placeholder.to_string()),
    };

    let branch = details
        .branch
        .as_ref()
        .map(|b| escape_html(b.name(locale)))
        .unwrap_or_else(|| placeholder.to_string());

    let text = submission
        .text
        .as_deref()
        .map(|t| match text_limit {
            Some(limit) => truncate_chars(t, limit),
            None => t.to_string(),
        })
        .map(|t| escape_html(&t))
        .unwrap_or_else(|| placeholder.to_string());

    let local_time = submission.created_at.with_timezone(&utc_offset);

    format!(
        "{}\n#{} | ⭐ {}\n👤 {} | 📱 {}\n📍 {}\n💬 {}\n🕒 {}",
        i18n.t(locale, "notify.title"),
        submission.id,
        rating,
        who,
        phone,
        branch,
        text,
        local_time.format("%Y-%m-%d %H:%M"),
    )
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDb, Outbound, RecordingMessenger};
    use chrono::{TimeZone, Utc};
    use review_bot_core::{AdminRole, Branch, PhotoRef, Rating, Submission, User};

    fn i18n() -> Arc<I18n> {
        Arc::new(I18n::embedded(Locale::Uz).unwrap())
    }

    fn tashkent() -> FixedOffset {
        FixedOffset::east_opt(5 * 3600).unwrap()
    }

    fn details(text: Option<&str>) -> SubmissionDetails {
        SubmissionDetails {
            submission: Submission {
                id: 42,
                user_id: Some(1),
                branch_id: 3,
                rating: Rating::new(4),
                text: text.map(str::to_string),
                photos: Vec::new(),
                created_at: Utc.with_ymd_and_hms(2026, 3, 1, 19, 30, 0).unwrap(),
            },
            user: Some(User {
                id: 1,
                tg_id: 501,
                first_name: Some("Ali".into()),
                last_name: Some("<Valiyev>".into()),
                phone: Some("+998901234567".into()),
                locale: Locale::Uz,
            }),
            branch: Some(Branch {
                id: 3,
                name_uz: "Chilonzor".into(),
                name_ru: "Чиланзар".into(),
            }),
        }
    }

    #[test]
    fn caption_contains_every_field() {
        let caption = render_caption(&i18n(), Locale::Ru, &details(Some("a & b")), tashkent(), None);
        assert_eq!(
            caption,
            "🆕 Новый отзыв!\n#42 | ⭐ 4\n👤 <a href=\"tg://user?id=501\">Ali &lt;Valiyev&gt;</a> | 📱 +998901234567\n📍 Чиланзар\n💬 a &amp; b\n🕒 2026-03-02 00:30"
        );
    }

    #[test]
    fn caption_uses_placeholders() {
        let mut d = details(None);
        d.submission.rating = None;
        d.user = None;
        d.branch = None;
        let caption = render_caption(&i18n(), Locale::Uz, &d, tashkent(), None);
        assert!(caption.contains("#42 | ⭐ -\n👤 - | 📱 -\n📍 -\n💬 -\n"));
    }

    #[test]
    fn long_text_is_truncated_for_photo_captions() {
        let long = "x".repeat(2000);
        let caption = render_caption(&i18n(), Locale::Uz, &details(Some(&long)), tashkent(), Some(10));
        assert!(caption.contains("💬 xxxxxxxxx…\n"));
    }

    #[test]
    fn shape_follows_photo_count() {
        assert_eq!(DeliveryShape::for_photo_count(0), DeliveryShape::Text);
        assert_eq!(DeliveryShape::for_photo_count(1), DeliveryShape::Photo);
        assert_eq!(DeliveryShape::for_photo_count(2), DeliveryShape::Gallery);
        assert_eq!(DeliveryShape::for_photo_count(10), DeliveryShape::Gallery);
    }

    async fn setup(photo_count: usize) -> (Arc<MemoryDb>, Arc<RecordingMessenger>, Notifier, i64) {
        let db = Arc::new(MemoryDb::new());
        let branch = db.seed_branch("Chilonzor", "Чиланзар");
        let user = db.seed_user(501, Some("+998901234567"), Locale::Uz);
        db.add_admin(900, AdminRole::SuperAdmin).await.unwrap();
        db.set_notification_channel(900, -100777, AdminRole::SuperAdmin)
            .await
            .unwrap();
        let photos: Vec<PhotoRef> = (0..photo_count)
            .map(|i| PhotoRef::new(format!("photo-{}", i)))
            .collect();
        let submission = db
            .create_submission(user.id, branch.id, Rating::new(5), Some("nice"), &photos)
            .await
            .unwrap();
        let messenger = Arc::new(RecordingMessenger::new());
        let notifier = Notifier::new(
            db.clone(),
            messenger.clone(),
            i18n(),
            tashkent(),
            Locale::Uz,
        );
        (db, messenger, notifier, submission.id)
    }

    #[tokio::test]
    async fn zero_photos_send_one_text_message() {
        let (_db, messenger, notifier, id) = setup(0).await;
        let outcome = notifier.notify(900, id).await;

        assert_eq!(
            outcome,
            NotifyOutcome::Delivered {
                chat_id: -100777,
                shape: DeliveryShape::Text
            }
        );
        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Outbound::Text { chat_id: -100777, .. }));
    }

    #[tokio::test]
    async fn one_photo_sends_one_photo_message() {
        let (_db, messenger, notifier, id) = setup(1).await;
        notifier.notify(900, id).await;

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Outbound::Photo { photo, caption, .. } => {
                assert_eq!(photo.file_id(), "photo-0");
                assert!(caption.as_deref().unwrap_or_default().contains("#"));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn many_photos_send_one_gallery_in_order() {
        let (_db, messenger, notifier, id) = setup(4).await;
        notifier.notify(900, id).await;

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Outbound::Gallery {
                photos,
                first_caption,
                ..
            } => {
                let ids: Vec<&str> = photos.iter().map(PhotoRef::file_id).collect();
                assert_eq!(ids, vec!["photo-0", "photo-1", "photo-2", "photo-3"]);
                assert!(first_caption.is_some());
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_binding_is_skipped_quietly() {
        let (_db, messenger, notifier, id) = setup(0).await;
        assert_eq!(notifier.notify(12345, id).await, NotifyOutcome::NoRecipient);
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed() {
        let (db, messenger, notifier, id) = setup(2).await;
        messenger.fail_sends(true);

        assert_eq!(notifier.notify(900, id).await, NotifyOutcome::Failed);
        // The committed review is untouched.
        let stored = db.fetch_submission_with_relations(id).await.unwrap();
        assert_eq!(stored.submission.photos.len(), 2);
    }

    #[tokio::test]
    async fn shared_chat_receives_one_copy() {
        let (db, messenger, notifier, id) = setup(0).await;
        db.set_notification_channel(901, -100777, AdminRole::SuperAdmin)
            .await
            .unwrap();

        let outcomes = notifier.notify_owners(&[900, 901], id).await;
        assert_eq!(outcomes[1], NotifyOutcome::Duplicate);
        assert_eq!(messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn recipients_include_persisted_super_admins() {
        let (db, _messenger, notifier, _id) = setup(0).await;
        db.add_admin(555, AdminRole::SuperAdmin).await.unwrap();
        db.add_admin(556, AdminRole::Admin).await.unwrap();

        // 900 is both configured and persisted.
        assert_eq!(notifier.recipients(&[900, 100]).await, vec![100, 555, 900]);
    }

    #[tokio::test]
    async fn long_text_review_fits_one_message() {
        let (db, messenger, notifier, _id) = setup(0).await;
        let branch = db.seed_branch("Yunusobod", "Юнусабад");
        let user = db.seed_user(502, None, Locale::Uz);
        let long = "x".repeat(5000);
        let submission = db
            .create_submission(user.id, branch.id, None, Some(&long), &[])
            .await
            .unwrap();

        notifier.notify(900, submission.id).await;
        let sent = messenger.sent();
        let text = sent[0].text().unwrap();
        assert!(text.chars().count() < 4096);
        assert!(text.contains("x…"));
    }
}

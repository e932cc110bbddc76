//! services/bot/src/bot/engine.rs
//!
//! The review conversation state machine.
//!
//! Every handler runs while holding the user's conversation lock and first checks
//! that the stored step is the one it expects. Anything else is a stale or
//! out-of-place interaction and is dropped without touching state.

use std::sync::Arc;

use async_trait::async_trait;
use review_bot_core::{validate, Locale, PhotoRef, PortError, PortResult, Rating, Rejection, User};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::bot::admin::{self, AdminOutcome};
use crate::bot::dispatcher::EventHandler;
use crate::bot::notify::Notifier;
use crate::bot::protocol::{BotCommand, CallbackAction, EventKind, InboundEvent, Sender};
use crate::bot::state::{AppState, CollectMode, ConversationState, ConversationStep, ConversationStore};
use crate::keyboards;

type Conversation = OwnedMutexGuard<ConversationState>;

pub struct ConversationEngine {
    app: Arc<AppState>,
    store: ConversationStore,
    notifier: Notifier,
}

impl ConversationEngine {
    pub fn new(app: Arc<AppState>, store: ConversationStore) -> Self {
        let notifier = Notifier::new(
            app.db.clone(),
            app.messenger.clone(),
            app.i18n.clone(),
            app.config.notify_utc_offset,
            app.config.default_locale,
        );
        Self {
            app,
            store,
            notifier,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Applies one event to the sender's conversation.
    pub async fn process(&self, event: InboundEvent) -> PortResult<()> {
        let InboundEvent {
            sender,
            chat_id,
            kind,
        } = event;
        if chat_id != sender.tg_id {
            return self.process_shared_chat(sender, chat_id, kind).await;
        }
        let mut conv = self.store.lock(sender.tg_id).await;
        let locale = self.locale_of(sender.tg_id).await;

        match kind {
            EventKind::Command { command, args } => {
                self.on_command(&mut conv, &sender, chat_id, locale, command, &args)
                    .await
            }
            EventKind::Text(text) => self.on_text(&mut conv, &sender, chat_id, locale, &text).await,
            EventKind::Photo { photo, caption, .. } => {
                self.on_photos(&mut conv, chat_id, locale, vec![photo], caption)
                    .await
            }
            EventKind::PhotoGroup { photos, caption } => {
                self.on_photos(&mut conv, chat_id, locale, photos, caption)
                    .await
            }
            EventKind::Contact { phone, user_id } => {
                self.on_contact(&mut conv, &sender, chat_id, locale, &phone, user_id)
                    .await
            }
            EventKind::Callback { id, action } => {
                if let Err(e) = self.app.messenger.answer_callback(&id, None).await {
                    warn!("Failed to acknowledge callback {}: {}", id, e);
                }
                match action {
                    Some(action) => {
                        self.on_callback(&mut conv, &sender, chat_id, locale, action)
                            .await
                    }
                    None => {
                        debug!("Ignoring unknown callback payload from {}.", sender.tg_id);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Groups and channels only take privileged commands; the review
    /// conversation lives in the private chat and is never touched from here.
    async fn process_shared_chat(
        &self,
        sender: Sender,
        chat_id: i64,
        kind: EventKind,
    ) -> PortResult<()> {
        match kind {
            EventKind::Command { command, args } if admin::required_level(command).is_some() => {
                let locale = self.locale_of(sender.tg_id).await;
                self.run_privileged(&sender, chat_id, locale, command, &args)
                    .await
            }
            EventKind::Callback { id, .. } => {
                if let Err(e) = self.app.messenger.answer_callback(&id, None).await {
                    warn!("Failed to acknowledge callback {}: {}", id, e);
                }
                Ok(())
            }
            _ => {
                debug!(
                    "Ignoring input from {} in shared chat {}.",
                    sender.tg_id, chat_id
                );
                Ok(())
            }
        }
    }

    async fn locale_of(&self, tg_id: i64) -> Locale {
        match self.app.db.get_user_locale(tg_id).await {
            Ok(locale) => locale,
            Err(PortError::NotFound(_)) => self.app.config.default_locale,
            Err(e) => {
                warn!("Failed to load locale for {}: {}", tg_id, e);
                self.app.config.default_locale
            }
        }
    }

    fn t(&self, locale: Locale, key: &str) -> String {
        self.app.i18n.t(locale, key).to_string()
    }

    //=====================================================================================
    // Commands and reply-keyboard labels
    //=====================================================================================

    async fn on_command(
        &self,
        conv: &mut Conversation,
        sender: &Sender,
        chat_id: i64,
        locale: Locale,
        command: BotCommand,
        args: &str,
    ) -> PortResult<()> {
        match command {
            BotCommand::Start => self.start(conv, sender, chat_id, locale).await,
            BotCommand::NewReview => self.begin_review(conv, sender, chat_id, locale).await,
            privileged => {
                self.run_privileged(sender, chat_id, locale, privileged, args)
                    .await
            }
        }
    }

    async fn run_privileged(
        &self,
        sender: &Sender,
        chat_id: i64,
        locale: Locale,
        command: BotCommand,
        args: &str,
    ) -> PortResult<()> {
        let outcome = admin::execute(&self.app, sender.tg_id, chat_id, command, args, locale).await;
        let text = match outcome {
            Ok(AdminOutcome::Done(text)) => text,
            Ok(AdminOutcome::NotFound) => self.t(locale, "admin.not_found"),
            Ok(AdminOutcome::Unauthorized) => self.t(locale, "admin.denied"),
            Ok(AdminOutcome::Invalid(usage)) => {
                self.app
                    .i18n
                    .format(locale, "admin.usage", &[("usage", usage)])
            }
            Err(e) => {
                error!("Privileged command {:?} failed: {}", command, e);
                self.t(locale, "admin.failed")
            }
        };
        self.app.messenger.send_text(chat_id, &text, None).await
    }

    async fn start(
        &self,
        conv: &mut Conversation,
        sender: &Sender,
        chat_id: i64,
        locale: Locale,
    ) -> PortResult<()> {
        self.app
            .db
            .upsert_user(
                sender.tg_id,
                sender.first_name.as_deref(),
                sender.last_name.as_deref(),
            )
            .await?;
        conv.restart(ConversationStep::AwaitingLocale);
        let kb = keyboards::lang_kb(&self.app.i18n, locale);
        self.app
            .messenger
            .send_text(chat_id, &self.t(locale, "start.greeting"), Some(&kb))
            .await
    }

    /// Starts a fresh review from whatever step the user is in.
    async fn begin_review(
        &self,
        conv: &mut Conversation,
        sender: &Sender,
        chat_id: i64,
        locale: Locale,
    ) -> PortResult<()> {
        match self.app.db.find_user(sender.tg_id).await? {
            None => self.start(conv, sender, chat_id, locale).await,
            Some(user) if user.phone.is_none() => self.ask_phone(conv, chat_id, locale).await,
            Some(_) => self.show_branches(conv, chat_id, locale).await,
        }
    }

    async fn ask_phone(&self, conv: &mut Conversation, chat_id: i64, locale: Locale) -> PortResult<()> {
        conv.restart(ConversationStep::AwaitingPhone);
        let kb = keyboards::contact_kb(&self.app.i18n, locale);
        self.app
            .messenger
            .send_text(chat_id, &self.t(locale, "phone.prompt"), Some(&kb))
            .await
    }

    async fn ask_locale(&self, conv: &mut Conversation, chat_id: i64, locale: Locale) -> PortResult<()> {
        conv.restart(ConversationStep::AwaitingLocale);
        let kb = keyboards::lang_kb(&self.app.i18n, locale);
        self.app
            .messenger
            .send_text(chat_id, &self.t(locale, "lang.prompt"), Some(&kb))
            .await
    }

    //=====================================================================================
    // Free input
    //=====================================================================================

    async fn on_text(
        &self,
        conv: &mut Conversation,
        sender: &Sender,
        chat_id: i64,
        locale: Locale,
        text: &str,
    ) -> PortResult<()> {
        let i18n = &self.app.i18n;
        if i18n.match_label("kb.new_review", text).is_some() {
            return self.begin_review(conv, sender, chat_id, locale).await;
        }
        if i18n.match_label("kb.change_lang", text).is_some() {
            return self.ask_locale(conv, chat_id, locale).await;
        }

        match conv.step {
            ConversationStep::Collecting(CollectMode::AwaitingTextOrPhoto) => {
                conv.draft.set_text(text);
                conv.step = ConversationStep::Collecting(CollectMode::Idle);
                self.show_menu(conv, chat_id, locale).await
            }
            ConversationStep::Collecting(CollectMode::AwaitingRating) => {
                let parsed = text.trim().parse::<i64>().ok();
                self.apply_rating(conv, chat_id, locale, parsed).await
            }
            ConversationStep::AwaitingPhone => {
                let kb = keyboards::contact_kb(i18n, locale);
                self.app
                    .messenger
                    .send_text(chat_id, &self.t(locale, "phone.prompt"), Some(&kb))
                    .await
            }
            step => {
                debug!("Ignoring text from {} in step {:?}.", sender.tg_id, step);
                Ok(())
            }
        }
    }

    async fn on_photos(
        &self,
        conv: &mut Conversation,
        chat_id: i64,
        locale: Locale,
        photos: Vec<PhotoRef>,
        caption: Option<String>,
    ) -> PortResult<()> {
        if !conv.is_collecting(CollectMode::AwaitingTextOrPhoto) {
            debug!(
                "Ignoring {} photo(s) from {} in step {:?}.",
                photos.len(),
                conv.user_id,
                conv.step
            );
            return Ok(());
        }
        conv.draft.push_photos(photos);
        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            conv.draft.set_text(&caption);
        }
        conv.step = ConversationStep::Collecting(CollectMode::Idle);
        self.show_menu(conv, chat_id, locale).await
    }

    async fn on_contact(
        &self,
        conv: &mut Conversation,
        sender: &Sender,
        chat_id: i64,
        locale: Locale,
        phone: &str,
        contact_user: Option<i64>,
    ) -> PortResult<()> {
        if conv.step != ConversationStep::AwaitingPhone {
            debug!("Ignoring contact from {} in step {:?}.", sender.tg_id, conv.step);
            return Ok(());
        }
        if contact_user.is_some_and(|id| id != sender.tg_id) {
            let kb = keyboards::contact_kb(&self.app.i18n, locale);
            return self
                .app
                .messenger
                .send_text(chat_id, &self.t(locale, "phone.foreign"), Some(&kb))
                .await;
        }

        self.ensure_user(sender).await?;
        self.app.db.set_user_phone(sender.tg_id, phone).await?;
        info!("Stored phone for {}.", sender.tg_id);

        let kb = keyboards::new_review_kb(&self.app.i18n, locale);
        self.app
            .messenger
            .send_text(chat_id, &self.t(locale, "phone.saved"), Some(&kb))
            .await?;
        self.show_branches(conv, chat_id, locale).await
    }

    //=====================================================================================
    // Buttons
    //=====================================================================================

    async fn on_callback(
        &self,
        conv: &mut Conversation,
        sender: &Sender,
        chat_id: i64,
        locale: Locale,
        action: CallbackAction,
    ) -> PortResult<()> {
        let step = conv.step;
        match (step, action) {
            (ConversationStep::AwaitingLocale, CallbackAction::Lang(chosen)) => {
                let user = self.ensure_user(sender).await?;
                self.app.db.set_user_locale(sender.tg_id, chosen).await?;
                if user.phone.is_none() {
                    return self.ask_phone(conv, chat_id, chosen).await;
                }
                let kb = keyboards::new_review_kb(&self.app.i18n, chosen);
                self.app
                    .messenger
                    .send_text(chat_id, &self.t(chosen, "lang.saved"), Some(&kb))
                    .await?;
                self.show_branches(conv, chat_id, chosen).await
            }
            (ConversationStep::AwaitingBranch, CallbackAction::Branch(branch_id)) => {
                match self.app.db.get_branch(branch_id).await {
                    Ok(_) => {
                        conv.restart(ConversationStep::Collecting(CollectMode::Idle));
                        conv.draft.branch_id = Some(branch_id);
                        self.show_menu(conv, chat_id, locale).await
                    }
                    Err(PortError::NotFound(_)) => {
                        self.app
                            .messenger
                            .send_text(chat_id, &self.t(locale, "branch.missing"), None)
                            .await?;
                        self.show_branches(conv, chat_id, locale).await
                    }
                    Err(e) => Err(e),
                }
            }
            (ConversationStep::Collecting(CollectMode::Idle), CallbackAction::AddRating) => {
                conv.step = ConversationStep::Collecting(CollectMode::AwaitingRating);
                let kb = keyboards::rating_kb(&self.app.i18n, locale);
                self.app
                    .messenger
                    .send_text(chat_id, &self.t(locale, "rating.prompt"), Some(&kb))
                    .await
            }
            (ConversationStep::Collecting(CollectMode::AwaitingRating), CallbackAction::Rate(value)) => {
                self.apply_rating(conv, chat_id, locale, Some(value)).await
            }
            (
                ConversationStep::Collecting(CollectMode::Idle),
                CallbackAction::AddText | CallbackAction::AddPhoto,
            ) => {
                let key = if action == CallbackAction::AddText {
                    "text.prompt"
                } else {
                    "photo.prompt"
                };
                conv.step = ConversationStep::Collecting(CollectMode::AwaitingTextOrPhoto);
                let kb = keyboards::back_to_review_menu_kb(&self.app.i18n, locale);
                self.app
                    .messenger
                    .send_text(chat_id, &self.t(locale, key), Some(&kb))
                    .await
            }
            (
                ConversationStep::Collecting(
                    CollectMode::AwaitingRating | CollectMode::AwaitingTextOrPhoto,
                ),
                CallbackAction::BackToMenu,
            ) => {
                conv.step = ConversationStep::Collecting(CollectMode::Idle);
                self.show_menu(conv, chat_id, locale).await
            }
            (ConversationStep::Collecting(_), CallbackAction::BackToBranches) => {
                self.show_branches(conv, chat_id, locale).await
            }
            (ConversationStep::Collecting(CollectMode::Idle), CallbackAction::Submit) => {
                self.submit(conv, sender, chat_id, locale).await
            }
            (step, action) => {
                debug!(
                    "Ignoring stale {:?} from {} in step {:?}.",
                    action, sender.tg_id, step
                );
                Ok(())
            }
        }
    }

    async fn apply_rating(
        &self,
        conv: &mut Conversation,
        chat_id: i64,
        locale: Locale,
        value: Option<i64>,
    ) -> PortResult<()> {
        match value.and_then(Rating::new) {
            Some(rating) => {
                conv.draft.rating = Some(rating);
                conv.step = ConversationStep::Collecting(CollectMode::Idle);
                self.show_menu(conv, chat_id, locale).await
            }
            None => {
                let kb = keyboards::rating_kb(&self.app.i18n, locale);
                self.app
                    .messenger
                    .send_text(chat_id, &self.t(locale, "rating.invalid"), Some(&kb))
                    .await
            }
        }
    }

    //=====================================================================================
    // Submission
    //=====================================================================================

    async fn submit(
        &self,
        conv: &mut Conversation,
        sender: &Sender,
        chat_id: i64,
        locale: Locale,
    ) -> PortResult<()> {
        let branch_id = match (validate(&conv.draft), conv.draft.branch_id) {
            (Ok(()), Some(branch_id)) => branch_id,
            (Err(Rejection::Empty), _) => {
                return self
                    .app
                    .messenger
                    .send_text(chat_id, &self.t(locale, "submit.empty"), None)
                    .await;
            }
            (rejection, _) => {
                error!("Refused draft of {} without a branch: {:?}", sender.tg_id, rejection);
                return self
                    .app
                    .messenger
                    .send_text(chat_id, &self.t(locale, "branch.missing"), None)
                    .await;
            }
        };

        let user = self.ensure_user(sender).await?;
        let draft = &conv.draft;
        let created = self
            .app
            .db
            .create_submission(
                user.id,
                branch_id,
                draft.rating,
                draft.text.as_deref(),
                &draft.photos,
            )
            .await;

        let submission = match created {
            Ok(submission) => submission,
            Err(e) => {
                // The draft stays as it is so the user can retry.
                error!("Failed to persist review of {}: {}", sender.tg_id, e);
                return self
                    .app
                    .messenger
                    .send_text(chat_id, &self.t(locale, "submit.failed"), None)
                    .await;
            }
        };
        info!(
            "Review #{} stored for {} with {} photo(s).",
            submission.id,
            sender.tg_id,
            submission.photos.len()
        );

        conv.restart(ConversationStep::AwaitingBranch);
        let kb = keyboards::new_review_kb(&self.app.i18n, locale);
        if let Err(e) = self
            .app
            .messenger
            .send_text(chat_id, &self.t(locale, "submit.done"), Some(&kb))
            .await
        {
            warn!("Failed to confirm review #{} to {}: {}", submission.id, sender.tg_id, e);
        }

        let owners = self
            .notifier
            .recipients(&self.app.authorizer.configured_super_admins())
            .await;
        self.notifier.notify_owners(&owners, submission.id).await;

        self.show_branches(conv, chat_id, locale).await
    }

    //=====================================================================================
    // Rendering helpers
    //=====================================================================================

    async fn ensure_user(&self, sender: &Sender) -> PortResult<User> {
        match self.app.db.find_user(sender.tg_id).await? {
            Some(user) => Ok(user),
            None => {
                self.app
                    .db
                    .upsert_user(
                        sender.tg_id,
                        sender.first_name.as_deref(),
                        sender.last_name.as_deref(),
                    )
                    .await
            }
        }
    }

    /// Resets to branch selection with an empty draft and lists the branches.
    async fn show_branches(
        &self,
        conv: &mut Conversation,
        chat_id: i64,
        locale: Locale,
    ) -> PortResult<()> {
        conv.restart(ConversationStep::AwaitingBranch);
        let branches = self.app.db.list_branches().await?;
        if branches.is_empty() {
            return self
                .app
                .messenger
                .send_text(chat_id, &self.t(locale, "branch.empty"), None)
                .await;
        }
        let kb = keyboards::branches_kb(&branches, locale);
        self.app
            .messenger
            .send_text(chat_id, &self.t(locale, "branch.prompt"), Some(&kb))
            .await
    }

    async fn show_menu(&self, conv: &mut Conversation, chat_id: i64, locale: Locale) -> PortResult<()> {
        let i18n = &self.app.i18n;
        let draft = &conv.draft;

        let branch_name = match draft.branch_id {
            Some(id) => match self.app.db.get_branch(id).await {
                Ok(branch) => branch.name(locale).to_string(),
                Err(e) => {
                    warn!("Failed to load branch {} for the menu: {}", id, e);
                    format!("#{}", id)
                }
            },
            None => "-".to_string(),
        };

        let mut text = i18n.format(locale, "menu.prompt", &[("branch", branch_name.as_str())]);
        if let Some(rating) = draft.rating {
            let stars = "⭐".repeat(usize::from(rating.value()));
            text.push('\n');
            text.push_str(&i18n.format(locale, "menu.rating", &[("value", stars.as_str())]));
        }
        if let Some(body) = &draft.text {
            text.push('\n');
            text.push_str(&i18n.format(locale, "menu.text", &[("value", body.as_str())]));
        }
        if !draft.photos.is_empty() {
            let count = draft.photos.len().to_string();
            text.push('\n');
            text.push_str(&i18n.format(locale, "menu.photos", &[("value", count.as_str())]));
        }

        let kb = keyboards::review_menu_kb(i18n, locale, draft.is_submittable());
        self.app.messenger.send_text(chat_id, &text, Some(&kb)).await
    }
}

#[async_trait]
impl EventHandler for ConversationEngine {
    async fn handle(&self, event: InboundEvent) {
        let user = event.sender.tg_id;
        if let Err(e) = self.process(event).await {
            error!("Failed to handle event for {}: {}", user, e);
        }
    }
}

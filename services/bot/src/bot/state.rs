//! services/bot/src/bot/state.rs
//!
//! Defines the shared application state and the per-user conversation store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use review_bot_core::{Authorizer, DatabaseService, MessagingService, SubmissionDraft};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::Config;
use crate::i18n::I18n;

//=========================================================================================
// AppState (Shared Across All Conversations)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub messenger: Arc<dyn MessagingService>,
    pub config: Arc<Config>,
    pub i18n: Arc<I18n>,
    pub authorizer: Arc<Authorizer>,
}

//=========================================================================================
// ConversationState (Specific to One User)
//=========================================================================================

/// What the review menu is currently waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Idle,
    AwaitingRating,
    AwaitingTextOrPhoto,
}

/// The step of the review conversation a user is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationStep {
    AwaitingLocale,
    AwaitingPhone,
    #[default]
    AwaitingBranch,
    Collecting(CollectMode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub user_id: i64,
    pub step: ConversationStep,
    pub draft: SubmissionDraft,
}

impl ConversationState {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            step: ConversationStep::default(),
            draft: SubmissionDraft::default(),
        }
    }

    /// Moves to `step` with an empty draft.
    pub fn restart(&mut self, step: ConversationStep) {
        self.step = step;
        self.draft = SubmissionDraft::default();
    }

    pub fn is_collecting(&self, mode: CollectMode) -> bool {
        self.step == ConversationStep::Collecting(mode)
    }
}

//=========================================================================================
// ConversationStore
//=========================================================================================

/// One mutable conversation record per user, kept for the lifetime of the process.
///
/// Each record sits behind its own async mutex, so updates for one user are
/// serialized while different users never contend.
#[derive(Clone, Default)]
pub struct ConversationStore {
    states: Arc<StdMutex<HashMap<i64, Arc<Mutex<ConversationState>>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: i64) -> Arc<Mutex<ConversationState>> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new(user_id))))
            .clone()
    }

    /// A snapshot of the user's state, created empty on first touch.
    pub async fn get(&self, user_id: i64) -> ConversationState {
        self.slot(user_id).lock().await.clone()
    }

    /// Applies `mutator` while holding the user's lock.
    pub async fn update<R>(
        &self,
        user_id: i64,
        mutator: impl FnOnce(&mut ConversationState) -> R,
    ) -> R {
        let slot = self.slot(user_id);
        let mut state = slot.lock().await;
        mutator(&mut state)
    }

    /// Exclusive access for a whole handler, across awaits.
    pub async fn lock(&self, user_id: i64) -> OwnedMutexGuard<ConversationState> {
        self.slot(user_id).lock_owned().await
    }

    /// Resets the user's conversation to the default step with an empty draft.
    pub async fn clear(&self, user_id: i64) {
        self.update(user_id, |state| *state = ConversationState::new(user_id))
            .await;
    }

    pub fn len(&self) -> usize {
        self.states.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! crates/review_bot_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the review bot's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete database and messaging provider.

use async_trait::async_trait;

use crate::domain::{
    Admin, AdminRole, Branch, BranchStats, Locale, NewBranch, PhotoRef, Rating, Submission,
    SubmissionDetails, User,
};
use crate::markup::Keyboard;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users ---
    async fn upsert_user(
        &self,
        tg_id: i64,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> PortResult<User>;

    async fn find_user(&self, tg_id: i64) -> PortResult<Option<User>>;

    /// Fails with `NotFound` when the user has never talked to the bot.
    async fn get_user_locale(&self, tg_id: i64) -> PortResult<Locale>;

    async fn set_user_locale(&self, tg_id: i64, locale: Locale) -> PortResult<()>;

    async fn set_user_phone(&self, tg_id: i64, phone: &str) -> PortResult<()>;

    async fn count_users(&self) -> PortResult<i64>;

    /// One page of users ordered by id.
    async fn list_users(&self, limit: i64, offset: i64) -> PortResult<Vec<User>>;

    // --- Branches ---
    async fn list_branches(&self) -> PortResult<Vec<Branch>>;

    async fn get_branch(&self, branch_id: i64) -> PortResult<Branch>;

    async fn create_branch(&self, branch: NewBranch) -> PortResult<Branch>;

    async fn update_branch(&self, branch_id: i64, branch: NewBranch) -> PortResult<Branch>;

    /// Returns `false` when there was no such branch.
    async fn delete_branch(&self, branch_id: i64) -> PortResult<bool>;

    async fn branch_stats(&self) -> PortResult<Vec<BranchStats>>;

    // --- Submissions ---

    /// Persists a review and all of its photos as one all-or-nothing unit.
    /// Photo order is preserved.
    async fn create_submission(
        &self,
        user_id: i64,
        branch_id: i64,
        rating: Option<Rating>,
        text: Option<&str>,
        photos: &[PhotoRef],
    ) -> PortResult<Submission>;

    /// The review, its author, branch and ordered photos read as one snapshot.
    async fn fetch_submission_with_relations(
        &self,
        submission_id: i64,
    ) -> PortResult<SubmissionDetails>;

    async fn count_submissions(&self) -> PortResult<i64>;

    /// One page of reviews with their relations, newest first.
    async fn list_submissions(&self, limit: i64, offset: i64)
        -> PortResult<Vec<SubmissionDetails>>;

    /// Replaces the rating and/or the text; `None` leaves a field as it is.
    async fn update_submission(
        &self,
        submission_id: i64,
        rating: Option<Rating>,
        text: Option<&str>,
    ) -> PortResult<Submission>;

    /// Returns `false` when there was no such review.
    async fn delete_submission(&self, submission_id: i64) -> PortResult<bool>;

    // --- Admins and notification bindings ---
    async fn get_admin(&self, tg_id: i64) -> PortResult<Option<Admin>>;

    async fn list_admins(&self) -> PortResult<Vec<Admin>>;

    /// Creates the admin record, or changes the role of an existing one.
    async fn add_admin(&self, tg_id: i64, role: AdminRole) -> PortResult<Admin>;

    /// Returns `false` when there was no such admin.
    async fn remove_admin(&self, tg_id: i64) -> PortResult<bool>;

    async fn resolve_notification_channel(&self, owner_tg_id: i64) -> PortResult<Option<i64>>;

    /// Binds `chat_id` as the owner's notification channel, creating the
    /// owner's admin record with `role` if it does not exist yet.
    async fn set_notification_channel(
        &self,
        owner_tg_id: i64,
        chat_id: i64,
        role: AdminRole,
    ) -> PortResult<()>;
}

/// The outbound rendering surface of the messaging provider.
#[async_trait]
pub trait MessagingService: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str, markup: Option<&Keyboard>)
        -> PortResult<()>;

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &PhotoRef,
        caption: Option<&str>,
        markup: Option<&Keyboard>,
    ) -> PortResult<()>;

    /// Sends the photos as one album. Only the first item carries the caption.
    async fn send_photo_gallery(
        &self,
        chat_id: i64,
        photos: &[PhotoRef],
        first_caption: Option<&str>,
    ) -> PortResult<()>;

    /// Acknowledges a button press so the client stops its progress indicator.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> PortResult<()>;
}

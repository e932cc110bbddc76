//! services/bot/src/testing.rs
//!
//! In-memory stand-ins for the database and the messaging provider, used by unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use review_bot_core::{
    Admin, AdminRole, Branch, BranchStats, DatabaseService, Keyboard, Locale, MessagingService,
    NewBranch, PhotoRef, PortError, PortResult, Rating, Submission, SubmissionDetails, User,
};

//=========================================================================================
// MemoryDb
//=========================================================================================

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    branches: Vec<Branch>,
    submissions: Vec<Submission>,
    admins: Vec<Admin>,
    next_id: i64,
    fail_submissions: bool,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn details(&self, submission: &Submission) -> SubmissionDetails {
        SubmissionDetails {
            submission: submission.clone(),
            user: self
                .users
                .iter()
                .find(|u| Some(u.id) == submission.user_id)
                .cloned(),
            branch: self
                .branches
                .iter()
                .find(|b| b.id == submission.branch_id)
                .cloned(),
        }
    }
}

#[derive(Default)]
pub struct MemoryDb {
    tables: Mutex<Tables>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    pub fn seed_branch(&self, name_uz: &str, name_ru: &str) -> Branch {
        let mut t = self.tables();
        let branch = Branch {
            id: t.next_id(),
            name_uz: name_uz.to_string(),
            name_ru: name_ru.to_string(),
        };
        t.branches.push(branch.clone());
        branch
    }

    pub fn seed_user(&self, tg_id: i64, phone: Option<&str>, locale: Locale) -> User {
        let mut t = self.tables();
        let user = User {
            id: t.next_id(),
            tg_id,
            first_name: Some(format!("User{}", tg_id)),
            last_name: None,
            phone: phone.map(str::to_string),
            locale,
        };
        t.users.push(user.clone());
        user
    }

    /// Makes every following `create_submission` fail.
    pub fn fail_submissions(&self, fail: bool) {
        self.tables().fail_submissions = fail;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.tables().submissions.clone()
    }

    pub fn user(&self, tg_id: i64) -> Option<User> {
        self.tables().users.iter().find(|u| u.tg_id == tg_id).cloned()
    }

    pub fn branches(&self) -> Vec<Branch> {
        self.tables().branches.clone()
    }

    pub fn admins(&self) -> Vec<Admin> {
        self.tables().admins.clone()
    }
}

#[async_trait]
impl DatabaseService for MemoryDb {
    async fn upsert_user(
        &self,
        tg_id: i64,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> PortResult<User> {
        let mut t = self.tables();
        if let Some(user) = t.users.iter_mut().find(|u| u.tg_id == tg_id) {
            user.first_name = first_name.map(str::to_string);
            user.last_name = last_name.map(str::to_string);
            return Ok(user.clone());
        }
        let user = User {
            id: t.next_id(),
            tg_id,
            first_name: first_name.map(str::to_string),
            last_name: last_name.map(str::to_string),
            phone: None,
            locale: Locale::default(),
        };
        t.users.push(user.clone());
        Ok(user)
    }

    async fn find_user(&self, tg_id: i64) -> PortResult<Option<User>> {
        Ok(self.user(tg_id))
    }

    async fn get_user_locale(&self, tg_id: i64) -> PortResult<Locale> {
        self.user(tg_id)
            .map(|u| u.locale)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", tg_id)))
    }

    async fn set_user_locale(&self, tg_id: i64, locale: Locale) -> PortResult<()> {
        let mut t = self.tables();
        let user = t
            .users
            .iter_mut()
            .find(|u| u.tg_id == tg_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", tg_id)))?;
        user.locale = locale;
        Ok(())
    }

    async fn set_user_phone(&self, tg_id: i64, phone: &str) -> PortResult<()> {
        let mut t = self.tables();
        let user = t
            .users
            .iter_mut()
            .find(|u| u.tg_id == tg_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", tg_id)))?;
        user.phone = Some(phone.to_string());
        Ok(())
    }

    async fn count_users(&self) -> PortResult<i64> {
        Ok(self.tables().users.len() as i64)
    }

    async fn list_users(&self, limit: i64, offset: i64) -> PortResult<Vec<User>> {
        let mut users = self.tables().users.clone();
        users.sort_by_key(|u| u.id);
        Ok(users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_branches(&self) -> PortResult<Vec<Branch>> {
        Ok(self.branches())
    }

    async fn get_branch(&self, branch_id: i64) -> PortResult<Branch> {
        self.tables()
            .branches
            .iter()
            .find(|b| b.id == branch_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Branch {} not found", branch_id)))
    }

    async fn create_branch(&self, branch: NewBranch) -> PortResult<Branch> {
        Ok(self.seed_branch(&branch.name_uz, &branch.name_ru))
    }

    async fn update_branch(&self, branch_id: i64, branch: NewBranch) -> PortResult<Branch> {
        let mut t = self.tables();
        let existing = t
            .branches
            .iter_mut()
            .find(|b| b.id == branch_id)
            .ok_or_else(|| PortError::NotFound(format!("Branch {} not found", branch_id)))?;
        existing.name_uz = branch.name_uz;
        existing.name_ru = branch.name_ru;
        Ok(existing.clone())
    }

    async fn delete_branch(&self, branch_id: i64) -> PortResult<bool> {
        let mut t = self.tables();
        let before = t.branches.len();
        t.branches.retain(|b| b.id != branch_id);
        let removed = t.branches.len() != before;
        if removed {
            t.submissions.retain(|s| s.branch_id != branch_id);
        }
        Ok(removed)
    }

    async fn branch_stats(&self) -> PortResult<Vec<BranchStats>> {
        let t = self.tables();
        Ok(t.branches
            .iter()
            .map(|b| {
                let reviews: Vec<&Submission> =
                    t.submissions.iter().filter(|s| s.branch_id == b.id).collect();
                let ratings: Vec<f64> = reviews
                    .iter()
                    .filter_map(|s| s.rating.map(|r| f64::from(r.value())))
                    .collect();
                let avg_rating = if ratings.is_empty() {
                    None
                } else {
                    Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
                };
                BranchStats {
                    branch: b.clone(),
                    reviews_count: reviews.len() as i64,
                    avg_rating,
                }
            })
            .collect())
    }

    async fn create_submission(
        &self,
        user_id: i64,
        branch_id: i64,
        rating: Option<Rating>,
        text: Option<&str>,
        photos: &[PhotoRef],
    ) -> PortResult<Submission> {
        let mut t = self.tables();
        if t.fail_submissions {
            return Err(PortError::Unexpected("database is unavailable".to_string()));
        }
        if !t.branches.iter().any(|b| b.id == branch_id) {
            return Err(PortError::NotFound(format!("Branch {} not found", branch_id)));
        }
        let submission = Submission {
            id: t.next_id(),
            user_id: Some(user_id),
            branch_id,
            rating,
            text: text.map(str::to_string),
            photos: photos.to_vec(),
            created_at: Utc::now(),
        };
        t.submissions.push(submission.clone());
        Ok(submission)
    }

    async fn fetch_submission_with_relations(
        &self,
        submission_id: i64,
    ) -> PortResult<SubmissionDetails> {
        let t = self.tables();
        t.submissions
            .iter()
            .find(|s| s.id == submission_id)
            .map(|s| t.details(s))
            .ok_or_else(|| PortError::NotFound(format!("Review {} not found", submission_id)))
    }

    async fn count_submissions(&self) -> PortResult<i64> {
        Ok(self.tables().submissions.len() as i64)
    }

    async fn list_submissions(
        &self,
        limit: i64,
        offset: i64,
    ) -> PortResult<Vec<SubmissionDetails>> {
        let t = self.tables();
        Ok(t.submissions
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|s| t.details(s))
            .collect())
    }

    async fn update_submission(
        &self,
        submission_id: i64,
        rating: Option<Rating>,
        text: Option<&str>,
    ) -> PortResult<Submission> {
        let mut t = self.tables();
        let submission = t
            .submissions
            .iter_mut()
            .find(|s| s.id == submission_id)
            .ok_or_else(|| PortError::NotFound(format!("Review {} not found", submission_id)))?;
        if let Some(rating) = rating {
            submission.rating = Some(rating);
        }
        if let Some(text) = text {
            submission.text = Some(text.to_string());
        }
        Ok(submission.clone())
    }

    async fn delete_submission(&self, submission_id: i64) -> PortResult<bool> {
        let mut t = self.tables();
        let before = t.submissions.len();
        t.submissions.retain(|s| s.id != submission_id);
        Ok(t.submissions.len() != before)
    }

    async fn get_admin(&self, tg_id: i64) -> PortResult<Option<Admin>> {
        Ok(self.tables().admins.iter().find(|a| a.tg_id == tg_id).cloned())
    }

    async fn list_admins(&self) -> PortResult<Vec<Admin>> {
        Ok(self.admins())
    }

    async fn add_admin(&self, tg_id: i64, role: AdminRole) -> PortResult<Admin> {
        let mut t = self.tables();
        if let Some(admin) = t.admins.iter_mut().find(|a| a.tg_id == tg_id) {
            admin.role = role;
            return Ok(admin.clone());
        }
        let admin = Admin {
            tg_id,
            role,
            group_id: None,
        };
        t.admins.push(admin.clone());
        Ok(admin)
    }

    async fn remove_admin(&self, tg_id: i64) -> PortResult<bool> {
        let mut t = self.tables();
        let before = t.admins.len();
        t.admins.retain(|a| a.tg_id != tg_id);
        Ok(t.admins.len() != before)
    }

    async fn resolve_notification_channel(&self, owner_tg_id: i64) -> PortResult<Option<i64>> {
        Ok(self
            .tables()
            .admins
            .iter()
            .find(|a| a.tg_id == owner_tg_id)
            .and_then(|a| a.group_id))
    }

    async fn set_notification_channel(
        &self,
        owner_tg_id: i64,
        chat_id: i64,
        role: AdminRole,
    ) -> PortResult<()> {
        let mut t = self.tables();
        match t.admins.iter_mut().find(|a| a.tg_id == owner_tg_id) {
            Some(admin) => admin.group_id = Some(chat_id),
            None => t.admins.push(Admin {
                tg_id: owner_tg_id,
                role,
                group_id: Some(chat_id),
            }),
        }
        Ok(())
    }
}

//=========================================================================================
// RecordingMessenger
//=========================================================================================

/// One outbound call, as the messenger saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text {
        chat_id: i64,
        text: String,
        markup: Option<Keyboard>,
    },
    Photo {
        chat_id: i64,
        photo: PhotoRef,
        caption: Option<String>,
    },
    Gallery {
        chat_id: i64,
        photos: Vec<PhotoRef>,
        first_caption: Option<String>,
    },
}

impl Outbound {
    pub fn chat_id(&self) -> i64 {
        match self {
            Outbound::Text { chat_id, .. }
            | Outbound::Photo { chat_id, .. }
            | Outbound::Gallery { chat_id, .. } => *chat_id,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Outbound::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Outbound>>,
    answered: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every send fails as if the provider were unreachable.
    pub fn fail_sends(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages sent to one chat.
    pub fn sent_to(&self, chat_id: i64) -> Vec<Outbound> {
        self.sent()
            .into_iter()
            .filter(|o| o.chat_id() == chat_id)
            .collect()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn record(&self, outbound: Outbound) -> PortResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(PortError::Unexpected("provider unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(outbound);
        Ok(())
    }
}

#[async_trait]
impl MessagingService for RecordingMessenger {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&Keyboard>,
    ) -> PortResult<()> {
        self.record(Outbound::Text {
            chat_id,
            text: text.to_string(),
            markup: markup.cloned(),
        })
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &PhotoRef,
        caption: Option<&str>,
        _markup: Option<&Keyboard>,
    ) -> PortResult<()> {
        self.record(Outbound::Photo {
            chat_id,
            photo: photo.clone(),
            caption: caption.map(str::to_string),
        })
    }

    async fn send_photo_gallery(
        &self,
        chat_id: i64,
        photos: &[PhotoRef],
        first_caption: Option<&str>,
    ) -> PortResult<()> {
        self.record(Outbound::Gallery {
            chat_id,
            photos: photos.to_vec(),
            first_caption: first_caption.map(str::to_string),
        })
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> PortResult<()> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

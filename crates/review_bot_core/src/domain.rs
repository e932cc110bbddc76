//! crates/review_bot_core/src/domain.rs
//!
//! Defines the pure, core data structures for the review bot.
//! These structs are independent of any database, transport or serialization format.

use chrono::{DateTime, Utc};

/// A language the bot can talk in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    Uz,
    Ru,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::Uz, Locale::Ru];

    pub fn code(self) -> &'static str {
        match self {
            Locale::Uz => "uz",
            Locale::Ru => "ru",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "uz" => Some(Locale::Uz),
            "ru" => Some(Locale::Ru),
            _ => None,
        }
    }
}

/// A person talking to the bot, identified by their transport id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub tg_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub locale: Locale,
}

impl User {
    /// Full name built from the non-empty name parts, if any.
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// A branch (location) that reviews are written about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub id: i64,
    pub name_uz: String,
    pub name_ru: String,
}

impl Branch {
    pub fn name(&self, locale: Locale) -> &str {
        match locale {
            Locale::Uz => &self.name_uz,
            Locale::Ru => &self.name_ru,
        }
    }
}

/// Names for a branch that is about to be created or renamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBranch {
    pub name_uz: String,
    pub name_ru: String,
}

/// Opaque, provider-issued handle of an uploaded photo.
///
/// Arrival order is carried by the position of the ref inside its list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhotoRef(pub String);

impl PhotoRef {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self(file_id.into())
    }

    pub fn file_id(&self) -> &str {
        &self.0
    }
}

/// A star rating, always within `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Option<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// The in-progress, not-yet-persisted review held in conversation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionDraft {
    pub branch_id: Option<i64>,
    pub rating: Option<Rating>,
    pub text: Option<String>,
    pub photos: Vec<PhotoRef>,
}

impl SubmissionDraft {
    pub fn for_branch(branch_id: i64) -> Self {
        Self {
            branch_id: Some(branch_id),
            ..Default::default()
        }
    }

    /// Replaces the free text. Blank text means "absent".
    pub fn set_text(&mut self, text: &str) {
        let trimmed = text.trim();
        self.text = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }

    pub fn push_photos(&mut self, photos: impl IntoIterator<Item = PhotoRef>) {
        self.photos.extend(photos);
    }

    /// True when at least one of rating, text or photos is present.
    pub fn has_content(&self) -> bool {
        self.rating.is_some() || self.text.is_some() || !self.photos.is_empty()
    }

    pub fn is_submittable(&self) -> bool {
        self.branch_id.is_some() && self.has_content()
    }
}

/// A persisted review. Owned by storage; the core only reads it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: i64,
    pub user_id: Option<i64>,
    pub branch_id: i64,
    pub rating: Option<Rating>,
    pub text: Option<String>,
    pub photos: Vec<PhotoRef>,
    pub created_at: DateTime<Utc>,
}

/// A submission together with the entities it refers to, fetched as one snapshot.
#[derive(Debug, Clone)]
pub struct SubmissionDetails {
    pub submission: Submission,
    pub user: Option<User>,
    pub branch: Option<Branch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRole {
    Admin,
    SuperAdmin,
}

impl AdminRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AdminRole::Admin => "admin",
            AdminRole::SuperAdmin => "super_admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(AdminRole::Admin),
            "super_admin" => Some(AdminRole::SuperAdmin),
            _ => None,
        }
    }
}

/// A persisted privileged identity and its notification binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin {
    pub tg_id: i64,
    pub role: AdminRole,
    /// Chat that receives new-review notifications for this admin.
    pub group_id: Option<i64>,
}

/// Aggregated review numbers for one branch.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchStats {
    pub branch: Branch,
    pub reviews_count: i64,
    pub avg_rating: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_accepts_only_one_to_five() {
        assert!(Rating::new(0).is_none());
        assert!(Rating::new(6).is_none());
        assert!(Rating::new(-3).is_none());
        assert_eq!(Rating::new(1).map(Rating::value), Some(1));
        assert_eq!(Rating::new(5).map(Rating::value), Some(5));
    }

    #[test]
    fn blank_text_counts_as_absent() {
        let mut draft = SubmissionDraft::for_branch(1);
        draft.set_text("   ");
        assert_eq!(draft.text, None);
        assert!(!draft.is_submittable());

        draft.set_text("  great service ");
        assert_eq!(draft.text.as_deref(), Some("great service"));
        assert!(draft.is_submittable());
    }

    #[test]
    fn display_name_skips_missing_parts() {
        let mut user = User {
            id: 1,
            tg_id: 10,
            first_name: Some("Ali".into()),
            last_name: None,
            phone: None,
            locale: Locale::Uz,
        };
        assert_eq!(user.display_name().as_deref(), Some("Ali"));
        user.last_name = Some("Valiyev".into());
        assert_eq!(user.display_name().as_deref(), Some("Ali Valiyev"));
        user.first_name = None;
        user.last_name = Some(" ".into());
        assert_eq!(user.display_name(), None);
    }

    #[test]
    fn locale_codes_round_trip() {
        for locale in Locale::ALL {
            assert_eq!(Locale::from_code(locale.code()), Some(locale));
        }
        assert_eq!(Locale::from_code("en"), None);
    }
}

//! crates/review_bot_core/src/validation.rs
//!
//! The submission validator: decides whether a draft may be persisted.

use crate::domain::SubmissionDraft;

/// Why a draft was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// No branch was chosen. The conversation flow never allows this.
    #[error("no branch selected")]
    MissingBranch,
    /// Rating, text and photos are all absent.
    #[error("review is empty")]
    Empty,
}

/// Checks that the draft names a branch and carries at least one of
/// rating, text or photos.
pub fn validate(draft: &SubmissionDraft) -> Result<(), Rejection> {
    if draft.branch_id.is_none() {
        return Err(Rejection::MissingBranch);
    }
    if !draft.has_content() {
        return Err(Rejection::Empty);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PhotoRef, Rating};

    #[test]
    fn empty_draft_is_rejected() {
        let draft = SubmissionDraft::for_branch(3);
        assert_eq!(validate(&draft), Err(Rejection::Empty));
    }

    #[test]
    fn any_single_field_makes_draft_submittable() {
        let mut with_rating = SubmissionDraft::for_branch(3);
        with_rating.rating = Rating::new(4);
        assert_eq!(validate(&with_rating), Ok(()));

        let mut with_text = SubmissionDraft::for_branch(3);
        with_text.set_text("great service");
        assert_eq!(validate(&with_text), Ok(()));

        let mut with_photo = SubmissionDraft::for_branch(3);
        with_photo.push_photos([PhotoRef::new("AgAD-1")]);
        assert_eq!(validate(&with_photo), Ok(()));
    }

    #[test]
    fn missing_branch_wins_over_content() {
        let draft = SubmissionDraft {
            branch_id: None,
            rating: Rating::new(5),
            ..Default::default()
        };
        assert_eq!(validate(&draft), Err(Rejection::MissingBranch));
    }
}

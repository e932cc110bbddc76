pub mod access;
pub mod domain;
pub mod markup;
pub mod ports;
pub mod validation;

pub use access::{AccessLevel, Authorizer};
pub use domain::{
    Admin, AdminRole, Branch, BranchStats, Locale, NewBranch, PhotoRef, Rating, Submission,
    SubmissionDetails, SubmissionDraft, User,
};
pub use markup::{InlineButton, Keyboard, ReplyButton};
pub use ports::{DatabaseService, MessagingService, PortError, PortResult};
pub use validation::{validate, Rejection};

pub mod attempt;
pub mod organization;
pub mod user;

pub use attempt::{AttemptKind, AuthenticationAttempt, Factor};
pub use organization::{
    validate_organization, validate_sub_organization, Organization, RequiredScope,
};
pub use user::{validate_user, ExternalIdentity, Phonenumber, SanitizedUser, User, UserStatus};

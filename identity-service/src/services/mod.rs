//! Services layer for the identity service.
//!
//! Business logic for registration and login flows, the organization
//! ownership graph, session management and authorization grants.

pub mod error;
mod flow;
mod grant;
mod graph;
mod identity;
mod organization;
mod session;
mod sms;
mod store;
pub mod totp;

pub use error::ServiceError;
pub use flow::{
    advance, pending_state, required_factors, AttemptService, FlowEvent, FlowState, IssuedCode,
    SideEffect, StepOutcome,
};
pub use grant::{
    GrantClaims, GrantDenyList, GrantRequest, GrantService, GrantTarget, MemoryDenyList,
    SignedGrant,
};
pub use graph::{OrgGraphValidator, Relation};
pub use identity::{IdentityService, LoginStart, RegistrationStart};
pub use organization::OrganizationService;
pub use session::{SessionManager, SessionType};
pub use sms::{LogSmsProvider, MockSmsService, SentSms, SmsProvider};
pub use store::{IdentityStore, MemoryStore, MongoStore};

//! Organization model - hierarchically owned entities that principals can
//! act on behalf of.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{ValidationError, ValidationErrors};

/// GlobalID pattern for a top-level organization.
static GLOBALID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9\-_\s]{3,150}$").expect("globalid regex is valid")
});

/// GlobalID pattern for a sub-organization: the dot separates parent.child.
static SUB_GLOBALID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9\-_\s.]{3,150}$").expect("sub globalid regex is valid")
});

/// A scope an organization mandates from any application requesting a
/// grant for it. Opaque beyond the scope string to this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredScope {
    pub scope: String,
}

/// An organization. Serde field names are the persisted wire names, which
/// form a compatibility contract with existing records and clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Unique human-readable identifier; dotted form denotes a
    /// sub-organization (`parent.child`).
    #[serde(rename = "_id")]
    pub globalid: String,

    /// Usernames with owner authority. Never empty for a persisted record.
    #[serde(default)]
    pub owners: Vec<String>,

    /// Usernames with non-owning membership.
    #[serde(default)]
    pub members: Vec<String>,

    /// Other organizations whose owners transitively own this one.
    #[serde(default)]
    pub orgowners: Vec<String>,

    /// Other organizations whose members/owners are transitively members
    /// of this one.
    #[serde(default)]
    pub orgmembers: Vec<String>,

    /// Scopes any authorizing application must explicitly request.
    #[serde(default)]
    pub requiredscopes: Vec<RequiredScope>,

    /// Associated verification material, opaque to this service.
    #[serde(rename = "publicKeys", default)]
    pub publickeys: Vec<String>,

    #[serde(default)]
    pub dns: Vec<String>,

    /// Maximum lifetime, in seconds, of any grant issued for this
    /// organization. 0 means no org-specific bound.
    #[serde(default)]
    pub secondsvalidity: i64,
}

impl Organization {
    /// Create a new organization owned by `owner`.
    pub fn new(globalid: String, owner: String) -> Self {
        Self {
            globalid,
            owners: vec![owner],
            members: Vec::new(),
            orgowners: Vec::new(),
            orgmembers: Vec::new(),
            requiredscopes: Vec::new(),
            publickeys: Vec::new(),
            dns: Vec::new(),
            secondsvalidity: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        validate_organization(self).is_ok()
    }

    pub fn is_valid_sub_organization(&self) -> bool {
        validate_sub_organization(self).is_ok()
    }

    /// The parent GlobalID of a dotted sub-organization, if any.
    pub fn parent_globalid(&self) -> Option<&str> {
        self.globalid.rsplit_once('.').map(|(parent, _)| parent)
    }
}

fn owners_violation() -> ValidationError {
    let mut err = ValidationError::new("min_items");
    err.message = Some("an organization must have at least one owner".into());
    err
}

fn globalid_violation() -> ValidationError {
    let mut err = ValidationError::new("pattern");
    err.message =
        Some("globalid must be 3-150 characters of lowercase letters, digits, -, _ or space".into());
    err
}

/// Validate a top-level organization. Violations are reported per field;
/// callers must not persist an organization that fails here.
pub fn validate_organization(org: &Organization) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if !GLOBALID_RE.is_match(&org.globalid) {
        errors.add("globalid", globalid_violation());
    }
    if org.owners.is_empty() {
        errors.add("owners", owners_violation());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a sub-organization: as [`validate_organization`] but the
/// GlobalID may contain dots.
pub fn validate_sub_organization(org: &Organization) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if !SUB_GLOBALID_RE.is_match(&org.globalid) {
        errors.add("globalid", globalid_violation());
    }
    if org.owners.is_empty() {
        errors.add("owners", owners_violation());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

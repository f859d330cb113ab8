use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Numeric role tiers issued by the backend. Codes must match the backend schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Role {
    User,
    Editor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Editor, Role::Admin];

    pub fn code(self) -> u16 {
        match self {
            Role::User => 100,
            Role::Editor => 200,
            Role::Admin => 999,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            100 => Some(Role::User),
            200 => Some(Role::Editor),
            999 => Some(Role::Admin),
            _ => None,
        }
    }
}

impl From<Role> for u16 {
    fn from(role: Role) -> Self {
        role.code()
    }
}

impl TryFrom<u16> for Role {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Role::from_code(code).ok_or_else(|| format!("unknown role code {code}"))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "User",
            Role::Editor => "Editor",
            Role::Admin => "Admin",
        };
        write!(f, "{name}")
    }
}

/// Allow-list of role codes attached to a route.
///
/// Codes are kept as raw integers so tokens carrying codes this client does not
/// know about still compare correctly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    codes: BTreeSet<u16>,
}

impl RoleSet {
    pub fn of(roles: &[Role]) -> Self {
        Self {
            codes: roles.iter().map(|r| r.code()).collect(),
        }
    }

    pub fn from_codes<I: IntoIterator<Item = u16>>(codes: I) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    pub fn codes(&self) -> &BTreeSet<u16> {
        &self.codes
    }

    /// At least one of `held` appears in this set.
    pub fn intersects(&self, held: &BTreeSet<u16>) -> bool {
        held.iter().any(|code| self.codes.contains(code))
    }
}

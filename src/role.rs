// src/role.rs

use crate::error::Result;
use crate::prefs::Preferences;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// One of the two symmetric identities a context can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    PrivateSpace,
    PersonalSpace,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::PrivateSpace, Role::PersonalSpace];

    pub fn opposite(self) -> Role {
        match self {
            Role::PrivateSpace => Role::PersonalSpace,
            Role::PersonalSpace => Role::PrivateSpace,
        }
    }

    /// Human readable label, also used as the identity certificate CN.
    pub fn describe(self) -> &'static str {
        match self {
            Role::PrivateSpace => "Private Space",
            Role::PersonalSpace => "Personal Space",
        }
    }

    /// Enum name as it travels on the wire and in persisted state.
    pub fn name(self) -> &'static str {
        match self {
            Role::PrivateSpace => "PRIVATE_SPACE",
            Role::PersonalSpace => "PERSONAL_SPACE",
        }
    }

    /// Strict lookup by enum name (wire format).
    pub fn from_name(name: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.name() == name)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(role) = Role::from_name(s) {
            return Ok(role);
        }
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "private" | "private_space" => Ok(Role::PrivateSpace),
            "personal" | "personal_space" => Ok(Role::PersonalSpace),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

const ROLE_FILE: &str = "profile_role.json";
const KEY_ROLE: &str = "role";

/// Persisted role of this context.
#[derive(Debug)]
pub struct RoleStore {
    prefs: Preferences,
}

impl RoleStore {
    pub fn open(state_dir: Option<&Path>) -> Result<Self> {
        Ok(Self {
            prefs: Preferences::open_in(state_dir, ROLE_FILE)?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            prefs: Preferences::in_memory(),
        }
    }

    /// Stored role; defaults to Personal Space and persists that default on first read.
    pub fn role(&mut self) -> Result<Role> {
        let stored = self.prefs.get_string(KEY_ROLE);
        let resolved = stored
            .as_deref()
            .and_then(Role::from_name)
            .unwrap_or(Role::PersonalSpace);
        if stored.is_none() {
            self.set_role(resolved)?;
        }
        Ok(resolved)
    }

    pub fn set_role(&mut self, role: Role) -> Result<()> {
        self.prefs.update(|e| e.put_string(KEY_ROLE, role.name()))
    }
}

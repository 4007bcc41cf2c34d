// src/bridge/routing.rs
// Which role should open links of a given category.

use crate::error::Result;
use crate::events::{dispatcher, LogLevel};
use crate::network::message::RoutingSnapshot;
use crate::prefs::Preferences;
use crate::role::Role;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use url::Url;

const ROUTING_FILE: &str = "link_routing_prefs.json";

const YOUTUBE_HOSTS: [&str; 5] = [
    "youtu.be",
    "www.youtube.com",
    "youtube.com",
    "m.youtube.com",
    "music.youtube.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkCategory {
    Browser,
    Maps,
    Youtube,
    Mail,
    Tel,
}

impl LinkCategory {
    pub const ALL: [LinkCategory; 5] = [
        LinkCategory::Browser,
        LinkCategory::Maps,
        LinkCategory::Youtube,
        LinkCategory::Mail,
        LinkCategory::Tel,
    ];

    /// Key used on the wire and in persisted state.
    pub fn key(self) -> &'static str {
        match self {
            LinkCategory::Browser => "browser",
            LinkCategory::Maps => "maps",
            LinkCategory::Youtube => "youtube",
            LinkCategory::Mail => "mail",
            LinkCategory::Tel => "tel",
        }
    }

    pub fn from_key(key: &str) -> Option<LinkCategory> {
        LinkCategory::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Category of a link. Anything unrecognised, unparsable included, is `Browser`.
    pub fn classify(uri: &str) -> LinkCategory {
        let Ok(url) = Url::parse(uri.trim()) else {
            return LinkCategory::Browser;
        };
        match url.scheme() {
            "mailto" => return LinkCategory::Mail,
            "tel" | "telprompt" => return LinkCategory::Tel,
            "geo" => return LinkCategory::Maps,
            _ => {}
        }
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return LinkCategory::Browser;
        };
        if url.scheme() == "https" && YOUTUBE_HOSTS.contains(&host.as_str()) {
            return LinkCategory::Youtube;
        }
        if host == "maps.app.goo.gl" || (host.ends_with("google.com") && url.path().starts_with("/maps")) {
            return LinkCategory::Maps;
        }
        LinkCategory::Browser
    }

    pub fn default_role(self) -> Role {
        match self {
            LinkCategory::Maps => Role::PrivateSpace,
            _ => Role::PersonalSpace,
        }
    }

    fn pref_key(self) -> String {
        format!("preferred_{}", self.key())
    }
}

impl fmt::Display for LinkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Persisted category -> role table.
#[derive(Debug)]
pub struct RoutingPrefs {
    prefs: Mutex<Preferences>,
}

impl RoutingPrefs {
    pub fn open(state_dir: Option<&Path>) -> Result<Self> {
        Ok(Self {
            prefs: Mutex::new(Preferences::open_in(state_dir, ROUTING_FILE)?),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            prefs: Mutex::new(Preferences::in_memory()),
        }
    }

    pub fn preferred_role(&self, category: LinkCategory) -> Role {
        self.prefs
            .lock()
            .get_string(&category.pref_key())
            .and_then(|name| Role::from_name(&name))
            .unwrap_or_else(|| category.default_role())
    }

    pub fn set_preferred_role(&self, category: LinkCategory, role: Role) -> Result<()> {
        self.prefs
            .lock()
            .update(|e| e.put_string(&category.pref_key(), role.name()))
    }

    /// Apply a `routing_pref` from the peer. Unknown category or role names are refused.
    pub fn apply_remote_update(&self, category_key: &str, role_name: &str) -> bool {
        let (Some(category), Some(role)) = (
            LinkCategory::from_key(category_key),
            Role::from_name(role_name),
        ) else {
            return false;
        };
        self.store(category, role)
    }

    /// Every category with its effective role.
    pub fn snapshot(&self) -> RoutingSnapshot {
        let prefs = self.prefs.lock();
        LinkCategory::ALL
            .into_iter()
            .map(|c| {
                let role = prefs
                    .get_string(&c.pref_key())
                    .and_then(|name| Role::from_name(&name))
                    .unwrap_or_else(|| c.default_role());
                (c.key().to_string(), role.name().to_string())
            })
            .collect()
    }

    /// Adopt the valid entries of a peer snapshot; true if any was applied.
    pub fn apply_snapshot(&self, snapshot: &RoutingSnapshot) -> bool {
        let mut applied = false;
        for category in LinkCategory::ALL {
            let Some(role) = snapshot
                .get(category.key())
                .and_then(|name| Role::from_name(name))
            else {
                continue;
            };
            applied |= self.store(category, role);
        }
        applied
    }

    fn store(&self, category: LinkCategory, role: Role) -> bool {
        match self.set_preferred_role(category, role) {
            Ok(()) => true,
            Err(e) => {
                dispatcher::emit_system("routing", LogLevel::Warn, "routing_persist_failed", Some(e.to_string()));
                false
            }
        }
    }
}

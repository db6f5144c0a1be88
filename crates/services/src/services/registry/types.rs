use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable profile identity.
///
/// The two negative ids of the wire format are reserved: −2 is the built-in
/// base pseudo-profile and −1 an unset sentinel. Neither is ever persisted;
/// both are regenerated from code defaults at startup.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "i32", try_from = "i32")]
pub enum ProfileId {
    /// Built-in servers (−2).
    #[default]
    Base,
    /// Reserved sentinel (−1).
    Unset,
    /// A registered remote server profile (non-negative).
    Custom(u32),
}

impl ProfileId {
    pub fn is_reserved(self) -> bool {
        !matches!(self, ProfileId::Custom(_))
    }

    pub fn as_i32(self) -> i32 {
        match self {
            ProfileId::Base => -2,
            ProfileId::Unset => -1,
            ProfileId::Custom(id) => i32::try_from(id).unwrap_or(i32::MAX),
        }
    }
}

#[derive(Debug, Error)]
#[error("{0} is not a valid profile id")]
pub struct InvalidProfileId(pub i32);

impl TryFrom<i32> for ProfileId {
    type Error = InvalidProfileId;

    fn try_from(raw: i32) -> Result<Self, InvalidProfileId> {
        match raw {
            -2 => Ok(ProfileId::Base),
            -1 => Ok(ProfileId::Unset),
            id if id >= 0 => Ok(ProfileId::Custom(id as u32)),
            _ => Err(InvalidProfileId(raw)),
        }
    }
}

impl From<ProfileId> for i32 {
    fn from(id: ProfileId) -> i32 {
        id.as_i32()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Profile icon reference.
///
/// Sprites name an asset bundled with the host; remote icons come from the
/// server's info endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ProfileIcon {
    #[default]
    None,
    Sprite(String),
    Remote(String),
}

impl ProfileIcon {
    pub fn is_none(&self) -> bool {
        matches!(self, ProfileIcon::None)
    }
}

/// One remote server profile and its cached metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub id: ProfileId,
    pub name: String,
    pub url: String,
    /// Name of this profile's save subtree, always a direct child of the
    /// storage root for non-reserved profiles.
    #[serde(default)]
    pub save_dir: String,
    /// Set once a metadata fetch has completed for the current url.
    #[serde(default)]
    pub info_loaded: bool,
    #[serde(default)]
    pub motd: String,
    #[serde(default)]
    pub icon: ProfileIcon,
}

impl ServerProfile {
    pub fn new(id: ProfileId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            save_dir: String::new(),
            info_loaded: false,
            motd: String::new(),
            icon: ProfileIcon::None,
        }
    }
}

/// Outcome of the pre-persistence validity check.
///
/// Flags combine; a record with every flag clear is safe to save. The url
/// shape is only checked when a url is present at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileValidity {
    pub name_empty: bool,
    pub url_empty: bool,
    pub url_invalid: bool,
}

impl ProfileValidity {
    pub fn is_valid(self) -> bool {
        self == Self::default()
    }
}

impl fmt::Display for ProfileValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "valid");
        }
        let mut problems = Vec::new();
        if self.name_empty {
            problems.push("name is empty");
        }
        if self.url_empty {
            problems.push("url is empty");
        }
        if self.url_invalid {
            problems.push("url is not a valid http(s) url");
        }
        write!(f, "{}", problems.join(", "))
    }
}

/// Broadcast to listeners when a profile's remote metadata lands.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    InfoLoaded(ServerProfile),
}

/// Ask the info fetcher to retrieve metadata for a profile.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub id: ProfileId,
    pub url: String,
}

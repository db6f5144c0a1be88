//! Profile registry.
//!
//! Owns the profile map, the selected profile, and every filesystem mutation
//! under the save-data storage root.

mod error;
mod service;
mod types;

pub use error::RegistryError;
pub use service::Registry;
pub use types::{
    FetchRequest, InvalidProfileId, ProfileIcon, ProfileId, ProfileValidity, RegistryEvent,
    ServerProfile,
};

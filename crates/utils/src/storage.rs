//! Storage location helpers.

use std::path::PathBuf;

/// Default save-data root, `<platform data dir>/gdps-core/saves`.
///
/// Hosts embedding the switcher usually supply their own root instead.
pub fn default_storage_root() -> Option<PathBuf> {
    dirs::data_dir().map(|base| base.join("gdps-core").join("saves"))
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Payload served by every remote server's info endpoint.
///
/// All fields are optional; the registry substitutes defaults for anything
/// missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub motd: Option<String>,
    pub icon: Option<String>,
    /// Mod metadata reserved by the endpoint; not consumed yet.
    pub mods: Option<ModsInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModsInfo {
    pub policy: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(rename = "modList", default)]
    pub mod_list: Vec<String>,
}

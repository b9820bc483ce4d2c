// src/core/model/role.rs

//! Role correspondence rows.

use serde::{Deserialize, Serialize};

/// One source↔mirror role correspondence row, unique on
/// `(sourceRoleId, serverId)`. The `@everyone` role is never mapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMapping {
    pub source_role_id: String,
    /// The *source* server this role belongs to.
    #[serde(rename = "serverId")]
    pub source_server_id: String,
    pub name: String,
    #[serde(rename = "discordId", default, skip_serializing_if = "Option::is_none")]
    pub mirror_role_id: Option<String>,
    /// Whether the mirror role's name and filtered permissions currently
    /// match the source role.
    #[serde(default)]
    pub synced: bool,
}

impl RoleMapping {
    pub fn new(
        source_role_id: impl Into<String>,
        source_server_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            source_role_id: source_role_id.into(),
            source_server_id: source_server_id.into(),
            name: name.into(),
            mirror_role_id: None,
            synced: false,
        }
    }
}

//! Wire types of the pageserver management API, trimmed to the fields this
//! harness reads.

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, TimelineId};

/// Runtime state of a tenant as reported by the management API.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::AsRefStr,
)]
#[serde(tag = "slug", content = "data")]
pub enum TenantState {
    Loading,
    Attaching,
    Activating(ActivatingFrom),
    Active,
    Stopping,
    Broken { reason: String, backtrace: String },
}

/// The states a tenant can be `Activating` from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivatingFrom {
    Loading,
    Attaching,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TenantInfo {
    pub id: TenantId,
    pub state: TenantState,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TenantDetails {
    #[serde(flatten)]
    pub tenant_info: TenantInfo,
    pub timelines: Vec<TimelineId>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TenantAttachRequest {
    pub config: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerMapInfo {
    pub historic_layers: Vec<HistoricLayerInfo>,
}

/// One on-disk layer in a timeline's layer map. `remote: true` means the
/// layer currently exists only in remote storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum HistoricLayerInfo {
    Delta {
        layer_file_name: String,
        layer_file_size: u64,
        remote: bool,
    },
    Image {
        layer_file_name: String,
        layer_file_size: u64,
        remote: bool,
    },
}

impl HistoricLayerInfo {
    pub fn layer_file_name(&self) -> &str {
        match self {
            Self::Delta { layer_file_name, .. } | Self::Image { layer_file_name, .. } => {
                layer_file_name
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        match self {
            Self::Delta { remote, .. } | Self::Image { remote, .. } => *remote,
        }
    }
}

pub type ConfigureFailpointsRequest = Vec<FailpointConfig>;

/// Configuration of a single named failpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailpointConfig {
    pub name: String,
    /// Disposition, e.g. `"return"` to fail immediately when hit, or `"off"`.
    pub actions: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_state_wire_format() {
        let state: TenantState = serde_json::from_str(r#"{"slug": "Active"}"#).unwrap();
        assert_eq!(state, TenantState::Active);
        assert_eq!(state.as_ref(), "Active");

        let state: TenantState = serde_json::from_str(
            r#"{"slug": "Broken", "data": {"reason": "attach-before-activate", "backtrace": ""}}"#,
        )
        .unwrap();
        assert_eq!(state.as_ref(), "Broken");
    }

    #[test]
    fn tenant_details_flattens_info() {
        let details: TenantDetails = serde_json::from_str(
            r#"{
                "id": "0123456789abcdef0123456789abcdef",
                "state": {"slug": "Active"},
                "current_physical_size": 42,
                "timelines": ["00000000000000000000000000000001"]
            }"#,
        )
        .unwrap();
        assert_eq!(details.tenant_info.state, TenantState::Active);
        assert_eq!(details.timelines.len(), 1);
    }

    #[test]
    fn layer_map_info_reports_residency() {
        let info: LayerMapInfo = serde_json::from_str(
            r#"{
                "in_memory_layers": [],
                "historic_layers": [
                    {"kind": "Delta", "layer_file_name": "d", "layer_file_size": 1, "remote": false},
                    {"kind": "Image", "layer_file_name": "i", "layer_file_size": 2, "remote": true}
                ]
            }"#,
        )
        .unwrap();
        assert!(!info.historic_layers[0].is_remote());
        assert!(info.historic_layers[1].is_remote());
        assert_eq!(info.historic_layers[1].layer_file_name(), "i");
    }
}

//! Supporting types for the ClusterTemplate CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Control-plane provider kinds
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ControlPlaneKind {
    /// Upstream kubeadm control plane
    Kubeadm,
    /// Rancher RKE2
    Rke2,
    /// k3s via the KThrees provider
    K3s,
}

impl ControlPlaneKind {
    /// All supported control-plane kinds
    pub const ALL: [ControlPlaneKind; 3] = [Self::Kubeadm, Self::Rke2, Self::K3s];

    /// Returns true if `s` names a supported control-plane kind
    pub fn is_supported(s: &str) -> bool {
        s.parse::<Self>().is_ok()
    }
}

impl std::str::FromStr for ControlPlaneKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kubeadm" => Ok(Self::Kubeadm),
            "rke2" => Ok(Self::Rke2),
            "k3s" => Ok(Self::K3s),
            _ => Err(crate::Error::validation(format!(
                "invalid control plane provider type: {s}, expected one of: kubeadm, rke2, k3s"
            ))),
        }
    }
}

impl std::fmt::Display for ControlPlaneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kubeadm => write!(f, "kubeadm"),
            Self::Rke2 => write!(f, "rke2"),
            Self::K3s => write!(f, "k3s"),
        }
    }
}

/// Infrastructure provider kinds
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InfraKind {
    /// CAPD, for development and CI
    Docker,
    /// Intel edge infrastructure provider
    Intel,
}

impl InfraKind {
    /// All supported infrastructure kinds
    pub const ALL: [InfraKind; 2] = [Self::Docker, Self::Intel];
}

impl std::str::FromStr for InfraKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "intel" => Ok(Self::Intel),
            _ => Err(crate::Error::validation(format!(
                "invalid infrastructure provider type: {s}, expected one of: docker, intel"
            ))),
        }
    }
}

impl std::fmt::Display for InfraKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Intel => write!(f, "intel"),
        }
    }
}

/// CIDR blocks for one network range
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRanges {
    /// CIDR blocks (e.g. "10.42.0.0/16")
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

/// Cluster network configuration copied to derived Clusters
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    /// Pod network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<NetworkRanges>,
    /// Service network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<NetworkRanges>,
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, ClusterClass)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// True if the condition status is `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Same type, status, reason and message (ignores timestamps)
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Insert or replace a condition by type
///
/// The transition time is kept when the status does not change, so repeated
/// reconciles of a stable object do not produce status churn.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("kubeadm", ControlPlaneKind::Kubeadm)]
    #[case("RKE2", ControlPlaneKind::Rke2)]
    #[case("k3s", ControlPlaneKind::K3s)]
    fn test_control_plane_kind_parses(#[case] input: &str, #[case] expected: ControlPlaneKind) {
        assert_eq!(input.parse::<ControlPlaneKind>().unwrap(), expected);
        assert_eq!(
            expected.to_string().parse::<ControlPlaneKind>().unwrap(),
            expected
        );
    }

    #[test]
    fn test_unknown_kinds_are_rejected() {
        assert!("talos".parse::<ControlPlaneKind>().is_err());
        assert!(!ControlPlaneKind::is_supported("microk8s"));
        assert!("vsphere".parse::<InfraKind>().is_err());
    }

    #[test]
    fn test_infra_kind_round_trips() {
        for kind in InfraKind::ALL {
            assert_eq!(kind.to_string().parse::<InfraKind>().unwrap(), kind);
        }
    }

    /// Story: condition timestamps only move on status transitions
    #[test]
    fn story_condition_transition_time_tracks_status_changes() {
        let mut conditions = Vec::new();
        let first = Condition::new("ClusterClass", ConditionStatus::False, "Failed", "boom");
        let first_time = first.last_transition_time;
        set_condition(&mut conditions, first);

        let mut same = Condition::new("ClusterClass", ConditionStatus::False, "Failed", "again");
        same.last_transition_time = first_time + chrono::Duration::seconds(30);
        set_condition(&mut conditions, same);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first_time);
        assert_eq!(conditions[0].message, "again");

        let mut flipped = Condition::new("ClusterClass", ConditionStatus::True, "Available", "");
        let flipped_time = first_time + chrono::Duration::seconds(60);
        flipped.last_transition_time = flipped_time;
        set_condition(&mut conditions, flipped);
        assert_eq!(conditions[0].last_transition_time, flipped_time);
        assert!(find_condition(&conditions, "ClusterClass").unwrap().is_true());
    }

    #[test]
    fn test_condition_serializes_with_kubernetes_field_names() {
        let condition = Condition::new("Ready", ConditionStatus::True, "Available", "ok");
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }
}

//! Custom Resource Definitions owned by the cluster manager

mod cluster_template;
mod types;

pub use cluster_template::{
    ClusterClassRef, ClusterTemplate, ClusterTemplateSpec, ClusterTemplateStatus,
    CLUSTER_TEMPLATE_FINALIZER, CLUSTER_TEMPLATE_GROUP, CONDITION_CLUSTER_CLASS,
    CONDITION_CONTROL_PLANE_MACHINE_TEMPLATE, CONDITION_CONTROL_PLANE_TEMPLATE,
    CONDITION_INFRA_CLUSTER_TEMPLATE, CONDITION_PREREQUISITES, CONDITION_READY,
    DESCRIPTION_ANNOTATION, STEP_CONDITIONS,
};
pub use types::{
    find_condition, set_condition, ClusterNetwork, Condition, ConditionStatus, ControlPlaneKind,
    InfraKind, NetworkRanges,
};

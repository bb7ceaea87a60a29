//! Provider strategies
//!
//! One [`ProviderStrategy`] per supported `(control plane, infrastructure)`
//! pair. Each strategy creates and probes the four child documents of a
//! ClusterTemplate and fills in a ClusterClass skeleton:
//!
//! | Pair           | Prerequisites          | ClusterClass variables                 |
//! |----------------|------------------------|----------------------------------------|
//! | kubeadm+docker | none                   | dockerKindImage                        |
//! | kubeadm+intel  | none                   | connectAgentManifest                   |
//! | rke2+docker    | HAProxy ConfigMap      | connectAgentManifest                   |
//! | rke2+intel     | none                   | connectAgentManifest                   |
//! | k3s+docker     | none                   | airGapped                              |
//! | k3s+intel      | none                   | connectAgentManifest, readOnly         |
//!
//! Child names: the control-plane template, infra cluster template and
//! ClusterClass share the ClusterTemplate's name; the control-plane machine
//! template appends `-controlplane`.

pub mod control_plane;
pub mod infra;
mod registry;
pub mod variables;

pub use control_plane::ControlPlaneTemplate;
pub use registry::{registry, ProviderRegistry};

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::json;
use tracing::{debug, instrument};

use ecm_common::crd::{ControlPlaneKind, InfraKind};
use ecm_common::kube_utils::config_map_resource;
use ecm_common::store::ResourceStore;
use ecm_common::{Error, Result};

use crate::clusterclass::{ClusterClass, LocalObjectTemplate};
use crate::constants::{control_plane_machine_template_name, rke2_lb_config_name, LB_CONFIG_KEY};

/// Strategy for one provider pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderStrategy {
    /// Kubeadm control plane on Docker
    KubeadmDocker,
    /// Kubeadm control plane on Intel infrastructure
    KubeadmIntel,
    /// RKE2 control plane on Docker
    Rke2Docker,
    /// RKE2 control plane on Intel infrastructure
    Rke2Intel,
    /// K3s control plane on Docker
    K3sDocker,
    /// K3s control plane on Intel infrastructure
    K3sIntel,
}

impl ProviderStrategy {
    /// Every strategy
    pub const ALL: [ProviderStrategy; 6] = [
        Self::KubeadmDocker,
        Self::KubeadmIntel,
        Self::Rke2Docker,
        Self::Rke2Intel,
        Self::K3sDocker,
        Self::K3sIntel,
    ];

    /// The strategy for a pair
    pub fn new(control_plane: ControlPlaneKind, infra: InfraKind) -> Self {
        match (control_plane, infra) {
            (ControlPlaneKind::Kubeadm, InfraKind::Docker) => Self::KubeadmDocker,
            (ControlPlaneKind::Kubeadm, InfraKind::Intel) => Self::KubeadmIntel,
            (ControlPlaneKind::Rke2, InfraKind::Docker) => Self::Rke2Docker,
            (ControlPlaneKind::Rke2, InfraKind::Intel) => Self::Rke2Intel,
            (ControlPlaneKind::K3s, InfraKind::Docker) => Self::K3sDocker,
            (ControlPlaneKind::K3s, InfraKind::Intel) => Self::K3sIntel,
        }
    }

    /// Control-plane kind of the pair
    pub fn control_plane(self) -> ControlPlaneKind {
        match self {
            Self::KubeadmDocker | Self::KubeadmIntel => ControlPlaneKind::Kubeadm,
            Self::Rke2Docker | Self::Rke2Intel => ControlPlaneKind::Rke2,
            Self::K3sDocker | Self::K3sIntel => ControlPlaneKind::K3s,
        }
    }

    /// Infrastructure kind of the pair
    pub fn infra(self) -> InfraKind {
        match self {
            Self::KubeadmDocker | Self::Rke2Docker | Self::K3sDocker => InfraKind::Docker,
            Self::KubeadmIntel | Self::Rke2Intel | Self::K3sIntel => InfraKind::Intel,
        }
    }

    fn has_lb_config(self) -> bool {
        matches!(self, Self::Rke2Docker)
    }

    // =========================================================================
    // Document builders
    // =========================================================================

    /// The control-plane template for ClusterTemplate `name`
    pub fn control_plane_template(
        self,
        namespace: &str,
        name: &str,
        config: &str,
    ) -> Result<ControlPlaneTemplate> {
        let cp = control_plane::parse(self.control_plane(), name, config)?.stamp(namespace, name);
        Ok(match self {
            Self::Rke2Intel => cp.with_infrastructure_ref(
                infra::api_version(self.infra()),
                infra::machine_template_kind(self.infra()),
                &control_plane_machine_template_name(name),
            ),
            _ => cp,
        })
    }

    /// The control-plane machine template for ClusterTemplate `name`
    pub fn control_plane_machine_template(self, namespace: &str, name: &str) -> Result<DynamicObject> {
        infra::machine_template(
            self.infra(),
            namespace,
            &control_plane_machine_template_name(name),
        )
    }

    /// The infrastructure cluster template for ClusterTemplate `name`
    pub fn cluster_template(self, namespace: &str, name: &str) -> Result<DynamicObject> {
        let lb_config = self.has_lb_config().then(|| rke2_lb_config_name(name));
        infra::cluster_template(self.infra(), namespace, name, lb_config.as_deref())
    }

    /// Prerequisite objects for ClusterTemplate `name`
    pub fn prerequisites(self, namespace: &str, name: &str) -> Result<Vec<DynamicObject>> {
        if !self.has_lb_config() {
            return Ok(Vec::new());
        }
        let cm = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": rke2_lb_config_name(name), "namespace": namespace },
            "data": { LB_CONFIG_KEY: infra::RKE2_HAPROXY_CONFIG },
        }))
        .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))?;
        Ok(vec![cm])
    }

    // =========================================================================
    // Store operations
    // =========================================================================

    /// Create the control-plane template from the ClusterTemplate's configuration
    #[instrument(skip(self, store, config), fields(strategy = ?self))]
    pub async fn create_control_plane_template(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
        config: &str,
    ) -> Result<()> {
        let obj = self
            .control_plane_template(namespace, name, config)?
            .into_dynamic()?;
        store
            .create(&control_plane::template_resource(self.control_plane()), &obj)
            .await?;
        debug!("control plane template created");
        Ok(())
    }

    /// Probe the control-plane template; `NotFound` if absent
    pub async fn get_control_plane_template(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        store
            .get_cached(&control_plane::template_resource(self.control_plane()), namespace, name)
            .await
    }

    /// Create the `-controlplane` machine template
    #[instrument(skip(self, store), fields(strategy = ?self))]
    pub async fn create_control_plane_machine_template(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        let obj = self.control_plane_machine_template(namespace, name)?;
        store
            .create(&infra::machine_template_resource(self.infra()), &obj)
            .await?;
        debug!("control plane machine template created");
        Ok(())
    }

    /// Probe the `-controlplane` machine template; `NotFound` if absent
    pub async fn get_control_plane_machine_template(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        store
            .get_cached(
                &infra::machine_template_resource(self.infra()),
                namespace,
                &control_plane_machine_template_name(name),
            )
            .await
    }

    /// Create the infrastructure cluster template
    #[instrument(skip(self, store), fields(strategy = ?self))]
    pub async fn create_cluster_template(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        let obj = self.cluster_template(namespace, name)?;
        store
            .create(&infra::cluster_template_resource(self.infra()), &obj)
            .await?;
        debug!("infrastructure cluster template created");
        Ok(())
    }

    /// Probe the infrastructure cluster template; `NotFound` if absent
    pub async fn get_cluster_template(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        store
            .get_cached(&infra::cluster_template_resource(self.infra()), namespace, name)
            .await
    }

    /// Create every prerequisite
    #[instrument(skip(self, store), fields(strategy = ?self))]
    pub async fn create_prerequisites(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        for obj in self.prerequisites(namespace, name)? {
            store.create(&config_map_resource(), &obj).await?;
        }
        Ok(())
    }

    /// Probe every prerequisite; `NotFound` if any is absent
    pub async fn get_prerequisites(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        if self.has_lb_config() {
            store
                .get_cached(&config_map_resource(), namespace, &rke2_lb_config_name(name))
                .await?;
        }
        Ok(())
    }

    /// Delete every prerequisite; missing ones are ignored
    #[instrument(skip(self, store), fields(strategy = ?self))]
    pub async fn delete_prerequisites(
        self,
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        if !self.has_lb_config() {
            return Ok(());
        }
        match store
            .delete(&config_map_resource(), namespace, &rke2_lb_config_name(name))
            .await
        {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // ClusterClass
    // =========================================================================

    /// Point a ClusterClass skeleton at this pair's templates and install its
    /// variables and patches
    ///
    /// Variables and patches are replaced outright.
    pub fn alter_cluster_class(self, cc: &mut ClusterClass) {
        let namespace = cc.metadata.namespace.clone().unwrap_or_default();
        let name = cc.metadata.name.clone().unwrap_or_default();
        let (cp, inf) = (self.control_plane(), self.infra());
        let cp_version = control_plane::api_version(cp);
        let cp_kind = control_plane::template_kind(cp);

        cc.spec.infrastructure = LocalObjectTemplate::new(
            infra::api_version(inf),
            infra::cluster_template_kind(inf),
            &name,
            &namespace,
        );
        cc.spec.control_plane.template =
            LocalObjectTemplate::new(cp_version, cp_kind, &name, &namespace);
        cc.spec.control_plane.machine_infrastructure = Some(LocalObjectTemplate::new(
            infra::api_version(inf),
            infra::machine_template_kind(inf),
            &control_plane_machine_template_name(&name),
            &namespace,
        ));

        let connect_agent = || {
            variables::connect_agent_patch(cp_version, cp_kind, control_plane::files_patch_path(cp))
        };

        let (vars, patches) = match self {
            Self::KubeadmDocker => (
                vec![variables::docker_kind_image_variable()],
                vec![variables::docker_kind_image_patch(
                    infra::api_version(inf),
                    infra::machine_template_kind(inf),
                )],
            ),
            Self::KubeadmIntel | Self::Rke2Docker | Self::Rke2Intel => (
                vec![variables::connect_agent_manifest_variable()],
                vec![connect_agent()],
            ),
            Self::K3sDocker => (
                vec![variables::air_gapped_variable()],
                vec![variables::air_gapped_patch(
                    cp_version,
                    cp_kind,
                    crate::constants::VAR_AIR_GAPPED,
                )],
            ),
            Self::K3sIntel => (
                vec![
                    variables::connect_agent_manifest_variable(),
                    variables::read_only_variable(),
                ],
                vec![
                    connect_agent(),
                    variables::air_gapped_patch(cp_version, cp_kind, crate::constants::VAR_READ_ONLY),
                    variables::read_only_patch(cp_version, cp_kind),
                ],
            ),
        };
        cc.spec.variables = vars;
        cc.spec.patches = patches;
    }
}

impl std::fmt::Display for ProviderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.control_plane(), self.infra())
    }
}

/// ApiResources of the template documents a strategy writes
///
/// The operator serves these from informer caches, since every reconcile
/// probes them.
pub fn child_resources() -> Vec<ApiResource> {
    let mut resources: Vec<ApiResource> = ControlPlaneKind::ALL
        .into_iter()
        .map(control_plane::template_resource)
        .collect();
    for kind in InfraKind::ALL {
        resources.push(infra::machine_template_resource(kind));
        resources.push(infra::cluster_template_resource(kind));
    }
    resources
}

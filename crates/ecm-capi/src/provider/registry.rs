//! Process-wide provider registry

use std::collections::HashMap;

use once_cell::sync::Lazy;

use ecm_common::crd::{ClusterTemplate, ControlPlaneKind, InfraKind};
use ecm_common::{Error, Result};

use super::ProviderStrategy;

static REGISTRY: Lazy<ProviderRegistry> = Lazy::new(ProviderRegistry::builtin);

/// The registry of built-in strategies
pub fn registry() -> &'static ProviderRegistry {
    &REGISTRY
}

/// Lookup table from provider pair to strategy
///
/// Immutable after construction.
#[derive(Debug)]
pub struct ProviderRegistry {
    strategies: HashMap<(ControlPlaneKind, InfraKind), ProviderStrategy>,
}

impl ProviderRegistry {
    /// Registry with every built-in pair
    pub fn builtin() -> Self {
        let strategies = ProviderStrategy::ALL
            .into_iter()
            .map(|s| ((s.control_plane(), s.infra()), s))
            .collect();
        Self { strategies }
    }

    /// Strategy for a pair named as in a ClusterTemplate spec
    ///
    /// Unknown names or pairs are `Unsupported`.
    pub fn get(&self, control_plane: &str, infra: &str) -> Result<ProviderStrategy> {
        let unsupported = || Error::unsupported(control_plane, infra);
        let cp: ControlPlaneKind = control_plane.parse().map_err(|_| unsupported())?;
        let inf: InfraKind = infra.parse().map_err(|_| unsupported())?;
        self.strategies.get(&(cp, inf)).copied().ok_or_else(unsupported)
    }

    /// Strategy for a ClusterTemplate
    pub fn for_template(&self, template: &ClusterTemplate) -> Result<ProviderStrategy> {
        self.get(
            &template.spec.control_plane_provider_type,
            &template.spec.infra_provider_type,
        )
    }

    /// Number of registered pairs
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// True if no pair is registered
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

use crate::collector::LogCollector;
use crate::config::CheckerConfig;
use crate::docker::{DockerBuilder, DockerTarget};
use crate::virtualbox::{VirtualBoxBuilder, VirtualBoxTarget};

/// One matrix entry bound to the backend that will execute it. The
/// orchestrator only ever sees this surface: identity accessors, the skip
/// flag, and `deploy`.
#[derive(Debug, Clone)]
pub enum Backend {
    Docker(DockerTarget),
    VirtualBox(VirtualBoxTarget),
}

impl Backend {
    pub fn platform(&self) -> &str {
        match self {
            Backend::Docker(target) => &target.os_name,
            Backend::VirtualBox(target) => &target.os_name,
        }
    }

    pub fn build_name(&self) -> &str {
        match self {
            Backend::Docker(target) => &target.build_name,
            Backend::VirtualBox(target) => &target.build_name,
        }
    }

    pub fn skip(&self) -> bool {
        match self {
            Backend::Docker(target) => target.skip,
            Backend::VirtualBox(target) => target.skip,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Docker(_) => "docker",
            Backend::VirtualBox(_) => "virtual_box",
        }
    }

    /// Display identity, also the first-level result key: container targets
    /// read `{os}_{image_version}`, VM targets read as the VM name.
    pub fn describe(&self) -> String {
        match self {
            Backend::Docker(target) => target.describe(),
            Backend::VirtualBox(target) => target.describe(),
        }
    }

    /// Composite key giving the matrix its deterministic run order.
    pub fn sort_key(&self) -> String {
        format!("{}_{}", self.describe(), self.build_name())
    }

    /// Drive the full deploy lifecycle. Never panics or propagates: every
    /// failure is logged to `logs` and folded into the boolean.
    pub fn deploy(&self, config: &CheckerConfig, logs: &LogCollector) -> bool {
        match self {
            Backend::Docker(target) => DockerBuilder::new(target, config, logs).deploy(),
            Backend::VirtualBox(target) => VirtualBoxBuilder::new(target, config, logs).deploy(),
        }
    }
}

/// The product version encoded as the last `_`-separated component of a
/// build name (`manual_2.4` carries version `2.4`).
pub fn product_version(build_name: &str) -> &str {
    build_name.rsplit('_').next().unwrap_or(build_name)
}

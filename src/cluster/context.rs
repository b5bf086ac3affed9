//! Suite-wide cluster context
//!
//! Built once per suite and passed by reference to every component, so
//! nothing reaches for a process-wide client or shared name constants.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::config::Config;
use crate::common::Result;
use crate::launcher::RunLauncher;
use crate::wait::{Clock, TokioClock};

use super::{ClusterApi, KubectlClient};

pub struct ClusterContext {
    api: Arc<dyn ClusterApi>,
    clock: Arc<dyn Clock>,
    pub config: Config,
    /// Token unique to this suite run, appended to cluster-scoped names
    pub run_token: String,
}

impl ClusterContext {
    pub fn new(api: Arc<dyn ClusterApi>, config: Config) -> Self {
        Self {
            api,
            clock: Arc::new(TokioClock),
            config,
            run_token: generate_run_token(),
        }
    }

    /// Context talking to the cluster through kubectl
    pub fn from_config(config: Config) -> Result<Self> {
        let kubectl = config.resolve_kubectl()?;
        let api = Arc::new(KubectlClient::new(kubectl, &config.cluster));
        Ok(Self::new(api, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_run_token(mut self, token: impl Into<String>) -> Self {
        self.run_token = token.into();
        self
    }

    pub fn api(&self) -> &dyn ClusterApi {
        self.api.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn launcher(&self) -> RunLauncher<'_> {
        RunLauncher::new(&self.config)
    }

    /// Suffix a cluster-scoped name with the suite token
    ///
    /// Names shared across scenarios (cluster role bindings, runtime classes)
    /// would otherwise collide when scenarios run concurrently.
    pub fn scoped_name(&self, base: &str) -> String {
        dns_label(&format!("{}-{}", base, self.run_token))
    }
}

/// Short token derived from the process id and start time
fn generate_run_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mixed = (nanos as u64) ^ (u64::from(std::process::id()) << 24);
    format!("{:06x}", mixed & 0xff_ffff)
}

/// Clamp a name to a valid DNS label (63 chars, lowercase alphanumerics and '-')
pub fn dns_label(name: &str) -> String {
    let mut label: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if label.len() > 63 {
        // Keep the tail, which carries the unique token
        label = label[label.len() - 63..].to_string();
    }
    label.trim_matches('-').to_string()
}

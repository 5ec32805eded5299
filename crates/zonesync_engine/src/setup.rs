//! One-time zone and subscription setup.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::token_store::{subscribed_flag, zone_created_flag, TokenStore};
use crate::transport::ZoneProvisioner;
use std::fmt;
use tracing::{info, warn};
use zonesync_protocol::{Scope, ZoneId};

/// A single setup action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStep {
    /// Create a zone.
    CreateZone(Scope, ZoneId),
    /// Subscribe to a database's change notifications.
    Subscribe(Scope, String),
}

impl SetupStep {
    fn flag(&self) -> String {
        match self {
            SetupStep::CreateZone(scope, zone) => zone_created_flag(*scope, zone),
            SetupStep::Subscribe(scope, id) => subscribed_flag(*scope, id),
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStep::CreateZone(scope, zone) => write!(f, "create zone {zone} in {scope}"),
            SetupStep::Subscribe(scope, id) => write!(f, "subscribe to {scope} as {id}"),
        }
    }
}

/// Outcome of a setup run.
#[derive(Debug, Default)]
pub struct SetupReport {
    /// Steps performed by this run.
    pub performed: Vec<SetupStep>,
    /// Steps already completed by an earlier run.
    pub already_done: Vec<SetupStep>,
    /// Steps that failed; they are retried by the next run.
    pub failed: Vec<(SetupStep, SyncError)>,
}

impl SetupReport {
    /// Returns true if every step is done.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs the idempotent setup steps.
///
/// Each step has a durable flag that is set only after the step succeeded.
/// A failing step is logged and left for the next run; it never stops the
/// remaining steps.
pub(crate) struct Setup<'a> {
    config: &'a SyncConfig,
    tokens: &'a TokenStore,
}

impl<'a> Setup<'a> {
    pub(crate) fn new(config: &'a SyncConfig, tokens: &'a TokenStore) -> Self {
        Self { config, tokens }
    }

    fn steps(&self) -> Vec<SetupStep> {
        let mut steps = Vec::with_capacity(3);
        if self.config.provision_default_zone {
            steps.push(SetupStep::CreateZone(
                Scope::Private,
                self.config.default_zone.clone(),
            ));
        }
        steps.push(SetupStep::Subscribe(
            Scope::Private,
            self.config.private_subscription_id.clone(),
        ));
        steps.push(SetupStep::Subscribe(
            Scope::Shared,
            self.config.shared_subscription_id.clone(),
        ));
        steps
    }

    pub(crate) async fn run(&self, provisioner: &dyn ZoneProvisioner) -> SetupReport {
        let mut report = SetupReport::default();

        for step in self.steps() {
            let flag = step.flag();
            if self.tokens.flag(&flag) {
                report.already_done.push(step);
                continue;
            }

            let result = match &step {
                SetupStep::CreateZone(scope, zone) => provisioner.create_zone(*scope, zone).await,
                SetupStep::Subscribe(scope, id) => provisioner.subscribe(*scope, id).await,
            };

            match result {
                Ok(()) => {
                    // An unsaved flag only means the step runs again next time.
                    if let Err(e) = self.tokens.set_flag(&flag) {
                        warn!(%step, error = %e, "setup flag not saved");
                    }
                    info!(%step, "setup step done");
                    report.performed.push(step);
                }
                Err(error) => {
                    warn!(%step, %error, "setup step failed, will retry");
                    report.failed.push((step, error));
                }
            }
        }

        report
    }
}

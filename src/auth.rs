use crate::{acl::Acl, error::RegistryError, models::Identity};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of an authorization check as seen by the listing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied,
}

/// Reply delivered through a provider's completion channel.
///
/// `BackendError` is a failure the backend *reported* instead of a decision
/// (the `(err, _)` callback arm of a Verdaccio auth plugin). It is distinct
/// from the provider failing outright, which providers signal by returning
/// `Err` before any reply is produced.
#[derive(Debug, Clone)]
pub enum CheckReply {
    Decision(bool),
    BackendError(String),
}

/// Capability-check collaborator. One call per package per request; the
/// gate never caches decisions.
#[async_trait]
pub trait AccessProvider: Send + Sync {
    async fn allow_access(
        &self,
        package_name: &str,
        identity: &Identity,
    ) -> Result<CheckReply, RegistryError>;
}

/// Wraps an [`AccessProvider`] and collapses its two failure channels into
/// the asymmetry the listing contract requires: a backend-reported error is
/// a denial, a provider malfunction propagates to the caller.
#[derive(Clone)]
pub struct AuthorizationGate {
    provider: Arc<dyn AccessProvider>,
}

impl AuthorizationGate {
    pub fn new(provider: Arc<dyn AccessProvider>) -> Self {
        Self { provider }
    }

    pub async fn is_allowed(
        &self,
        package_name: &str,
        identity: &Identity,
    ) -> Result<AccessDecision, RegistryError> {
        match self.provider.allow_access(package_name, identity).await? {
            CheckReply::Decision(true) => Ok(AccessDecision::Allowed),
            CheckReply::Decision(false) => {
                debug!(package = package_name, "access denied");
                Ok(AccessDecision::Denied)
            }
            CheckReply::BackendError(reason) => {
                warn!(
                    package = package_name,
                    reason, "access check reported a backend error; treating as denial"
                );
                Ok(AccessDecision::Denied)
            }
        }
    }
}

/// Default provider: answers from the configured `packages:` rules. Always
/// reaches a decision; neither failure channel is used.
pub struct AclAccessProvider {
    acl: Acl,
}

impl AclAccessProvider {
    pub fn new(acl: Acl) -> Self {
        Self { acl }
    }
}

#[async_trait]
impl AccessProvider for AclAccessProvider {
    async fn allow_access(
        &self,
        package_name: &str,
        identity: &Identity,
    ) -> Result<CheckReply, RegistryError> {
        Ok(CheckReply::Decision(
            self.acl.can_access(package_name, identity),
        ))
    }
}

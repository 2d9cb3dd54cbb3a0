//! Permission checking collaborator.
//!
//! The core threads a checker through every execution context; commands call
//! it, the pipeline never interprets its answers.

use async_trait::async_trait;

use crate::error::{ExecutionError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub instance_id: String,
    pub permission: String,
    pub resource_owner: String,
    pub aggregate_id: Option<String>,
}

impl PermissionRequest {
    pub fn new(
        instance_id: impl Into<String>,
        permission: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            permission: permission.into(),
            resource_owner: resource_owner.into(),
            aggregate_id: None,
        }
    }

    pub fn on_aggregate(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }
}

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// `Ok(())` when granted, [`ExecutionError::Permission`] otherwise
    async fn check(&self, request: &PermissionRequest) -> Result<()>;
}

/// Default checker: denies everything until a real one is injected
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl PermissionChecker for DenyAll {
    async fn check(&self, request: &PermissionRequest) -> Result<()> {
        Err(ExecutionError::Permission(format!(
            "{} on {} denied: no permission checker configured",
            request.permission, request.resource_owner
        )))
    }
}

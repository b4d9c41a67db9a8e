use std::sync::Arc;

use mentorline_store::{AccountDirectory, StoreError};
use mentorline_types::AccountRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections surfaced to administrative callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl AdminError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission-denied",
            Self::InvalidArgument(_) => "invalid-argument",
            Self::NotFound(_) => "not-found",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AdminError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::AccountNotFound(uid) => Self::NotFound(format!("User {uid} not found.")),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAccountDisabledRequest {
    /// Authenticated caller; `None` for anonymous requests.
    #[serde(default)]
    pub caller_uid: Option<String>,
    pub uid: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub message: String,
}

/// Account administration backed by the identity directory.
#[derive(Clone)]
pub struct AccountAdministration {
    accounts: Arc<dyn AccountDirectory>,
}

impl AccountAdministration {
    pub fn new(accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { accounts }
    }

    /// Enables or disables `request.uid`. The caller must hold the admin
    /// claim.
    #[tracing::instrument(
        name = "set_account_disabled",
        skip_all,
        fields(uid = %request.uid, disabled = request.disabled)
    )]
    pub async fn set_account_disabled(
        &self,
        request: &SetAccountDisabledRequest,
    ) -> Result<AdminResponse, AdminError> {
        self.require_admin(request.caller_uid.as_deref()).await?;
        let uid = request.uid.trim();
        if uid.is_empty() {
            return Err(AdminError::InvalidArgument(
                "uid must be non-empty".to_string(),
            ));
        }

        let account = self
            .accounts
            .set_account_disabled(uid, request.disabled)
            .await?;
        let state = if account.disabled {
            "disabled"
        } else {
            "enabled"
        };
        tracing::info!(state, "account state updated");
        Ok(AdminResponse {
            message: format!("User {} has been {state}.", account.uid),
        })
    }

    /// Sets the admin claim on `uid`, creating the directory entry if needed.
    pub async fn grant_admin_claim(&self, uid: &str) -> Result<AccountRecord, AdminError> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(AdminError::InvalidArgument(
                "uid must be non-empty".to_string(),
            ));
        }
        let account = self.accounts.set_admin_claim(uid, true).await?;
        tracing::info!(uid, "admin claim set");
        Ok(account)
    }

    async fn require_admin(&self, caller_uid: Option<&str>) -> Result<(), AdminError> {
        let denied = || AdminError::PermissionDenied("Only admins can modify users.".to_string());
        let Some(caller_uid) = caller_uid.map(str::trim).filter(|uid| !uid.is_empty()) else {
            return Err(denied());
        };
        match self.accounts.get_account(caller_uid).await? {
            Some(account) if account.admin && !account.disabled => Ok(()),
            _ => {
                tracing::warn!(caller_uid, "admin request rejected");
                Err(denied())
            }
        }
    }
}

//! Operation Context
//!
//! Identity and tracing metadata for the current request. The caller's
//! capability is resolved once at the HTTP boundary and then passed down as
//! a typed value.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use super::account::Role;

/// Verified identity of the requesting account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub account_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn new(account_id: Uuid, role: Role) -> Self {
        Self { account_id, role }
    }

    /// Upgrade to a privileged capability if the account holds the admin role
    pub fn privileged(&self) -> Option<Privileged> {
        match self.role {
            Role::Admin => Some(Privileged {
                account_id: self.account_id,
            }),
            Role::Customer => None,
        }
    }
}

/// Capability proving the caller is an administrator.
///
/// Only obtainable through [`Caller::privileged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privileged {
    account_id: Uuid,
}

impl Privileged {
    pub fn account_id(&self) -> Uuid {
        self.account_id
    }
}

/// Context for an operation, used for tracing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationContext {
    /// Account resolved from the bearer credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<Caller>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Client IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_is_not_privileged() {
        let caller = Caller::new(Uuid::new_v4(), Role::Customer);
        assert!(caller.privileged().is_none());
    }

    #[test]
    fn test_admin_is_privileged() {
        let id = Uuid::new_v4();
        let caller = Caller::new(id, Role::Admin);
        assert_eq!(caller.privileged().map(|p| p.account_id()), Some(id));
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context = OperationContext::new().with_caller(Caller::new(Uuid::new_v4(), Role::Customer));
        assert!(context.correlation_id.is_none());

        let id = context.ensure_correlation_id();
        assert_eq!(context.correlation_id, Some(id));
        assert_eq!(context.ensure_correlation_id(), id);
    }
}

use serde::{Deserialize, Serialize};

use crate::model::{Booking, ResourceKey};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Customer,
    Admin,
}

/// Who is asking. Already authenticated upstream; the engine only records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub customer_ref: String,
    #[serde(default)]
    pub role: Role,
}

impl Caller {
    pub fn customer(customer_ref: impl Into<String>) -> Self {
        Self {
            customer_ref: customer_ref.into(),
            role: Role::Customer,
        }
    }

    pub fn admin(customer_ref: impl Into<String>) -> Self {
        Self {
            customer_ref: customer_ref.into(),
            role: Role::Admin,
        }
    }

    /// Identity used by background maintenance tasks.
    pub fn system() -> Self {
        Self::admin("system")
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Authorization decisions the engine defers to.
pub trait AccessPolicy: Send + Sync {
    fn may_book(&self, caller: &Caller, resource: &ResourceKey) -> bool;
    fn may_cancel(&self, caller: &Caller, booking: &Booking) -> bool;
    /// Confirm and complete.
    fn may_manage(&self, caller: &Caller, booking: &Booking) -> bool;
}

/// Anyone may book; owners and admins may cancel; only admins confirm or complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerOrAdmin;

impl AccessPolicy for OwnerOrAdmin {
    fn may_book(&self, _caller: &Caller, _resource: &ResourceKey) -> bool {
        true
    }

    fn may_cancel(&self, caller: &Caller, booking: &Booking) -> bool {
        caller.is_admin() || caller.customer_ref == booking.customer_ref
    }

    fn may_manage(&self, caller: &Caller, _booking: &Booking) -> bool {
        caller.is_admin()
    }
}

//! Role to permission table
//!
//! Checked at the top of every handler, before any service call.

use wastewise_shared::types::Role;

use super::middleware::AuthUser;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    PickupCreate,
    PickupView,
    PickupAssign,
    PickupCancel,
    PickupReschedule,
    PickupAccept,
    PickupReject,
    PickupComplete,
    /// View plans and manage the caller's own subscription
    SubscriptionView,
    /// Create, update and delete plans
    SubscriptionManage,
    UsageAdmin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PickupCreate => "pickup.create",
            Self::PickupView => "pickup.view",
            Self::PickupAssign => "pickup.assign",
            Self::PickupCancel => "pickup.cancel",
            Self::PickupReschedule => "pickup.reschedule",
            Self::PickupAccept => "pickup.accept",
            Self::PickupReject => "pickup.reject",
            Self::PickupComplete => "pickup.complete",
            Self::SubscriptionView => "subscription.view",
            Self::SubscriptionManage => "subscription.manage",
            Self::UsageAdmin => "usage.admin",
        }
    }
}

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::PickupCreate,
    Permission::PickupView,
    Permission::PickupAssign,
    Permission::PickupCancel,
    Permission::PickupReschedule,
    Permission::PickupAccept,
    Permission::PickupReject,
    Permission::PickupComplete,
    Permission::SubscriptionView,
    Permission::SubscriptionManage,
    Permission::UsageAdmin,
];

const ORGANIZATION_PERMISSIONS: &[Permission] = &[
    Permission::PickupCreate,
    Permission::PickupView,
    Permission::PickupAssign,
    Permission::PickupCancel,
    Permission::PickupReschedule,
    Permission::SubscriptionView,
];

const DRIVER_PERMISSIONS: &[Permission] = &[
    Permission::PickupView,
    Permission::PickupAccept,
    Permission::PickupReject,
    Permission::PickupComplete,
];

pub fn permissions_for(role: Role) -> &'static [Permission] {
    match role {
        Role::Admin => ADMIN_PERMISSIONS,
        Role::Organization => ORGANIZATION_PERMISSIONS,
        Role::Driver => DRIVER_PERMISSIONS,
    }
}

pub fn has_permission(user: &AuthUser, permission: Permission) -> bool {
    user.roles
        .iter()
        .any(|role| permissions_for(*role).contains(&permission))
}

pub fn require_permission(user: &AuthUser, permission: Permission) -> ApiResult<()> {
    if has_permission(user, permission) {
        return Ok(());
    }
    tracing::debug!(
        user_id = %user.user_id,
        permission = permission.as_str(),
        "Permission denied"
    );
    Err(ApiError::Forbidden(format!(
        "Missing permission: {}",
        permission.as_str()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(roles: &[Role]) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            org_id: Some(Uuid::new_v4()),
            roles: roles.to_vec(),
        }
    }

    #[test]
    fn test_admin_holds_everything() {
        let admin = user(&[Role::Admin]);
        for permission in ADMIN_PERMISSIONS {
            assert!(has_permission(&admin, *permission));
        }
    }

    #[test]
    fn test_driver_cannot_create_or_manage() {
        let driver = user(&[Role::Driver]);
        assert!(require_permission(&driver, Permission::PickupCreate).is_err());
        assert!(require_permission(&driver, Permission::PickupAssign).is_err());
        assert!(require_permission(&driver, Permission::SubscriptionView).is_err());
        assert!(require_permission(&driver, Permission::PickupAccept).is_ok());
    }

    #[test]
    fn test_organization_cannot_drive_or_administer() {
        let org = user(&[Role::Organization]);
        assert!(require_permission(&org, Permission::PickupCreate).is_ok());
        assert!(require_permission(&org, Permission::PickupComplete).is_err());
        assert!(require_permission(&org, Permission::SubscriptionManage).is_err());
        assert!(require_permission(&org, Permission::UsageAdmin).is_err());
    }

    #[test]
    fn test_roles_combine() {
        let both = user(&[Role::Organization, Role::Driver]);
        assert!(has_permission(&both, Permission::PickupCreate));
        assert!(has_permission(&both, Permission::PickupComplete));
    }

    #[test]
    fn test_no_roles_no_permissions() {
        let nobody = user(&[]);
        assert!(matches!(
            require_permission(&nobody, Permission::PickupView),
            Err(ApiError::Forbidden(msg)) if msg == "Missing permission: pickup.view"
        ));
    }
}

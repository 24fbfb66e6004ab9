/*!
 * # Permissions
 *
 * Administrator roles and the `resource:action` permissions each grants.
 */

/// Permission string constants
pub mod consts {
    pub const ALL: &str = "*";

    pub const ORDERS_READ: &str = "orders:read";
    pub const ORDERS_UPDATE: &str = "orders:update";

    pub const CATALOG_READ: &str = "catalog:read";
    pub const CATALOG_WRITE: &str = "catalog:write";

    pub const DISCOUNTS_READ: &str = "discounts:read";
    pub const DISCOUNTS_WRITE: &str = "discounts:write";

    pub const GIFT_CARDS_READ: &str = "gift_cards:read";
    pub const GIFT_CARDS_WRITE: &str = "gift_cards:write";

    pub const AUDIT_READ: &str = "audit:read";
}

/// Roles
pub struct Roles;

impl Roles {
    pub const SUPER_ADMIN: &'static str = "super_admin";
    pub const ADMIN: &'static str = "admin";
    pub const EDITOR: &'static str = "editor";
    pub const VIEWER: &'static str = "viewer";
}

use consts::*;

const SUPER_ADMIN_PERMISSIONS: &[&str] = &[ALL];

const ADMIN_PERMISSIONS: &[&str] = &[
    ORDERS_READ,
    ORDERS_UPDATE,
    CATALOG_READ,
    CATALOG_WRITE,
    DISCOUNTS_READ,
    DISCOUNTS_WRITE,
    GIFT_CARDS_READ,
    GIFT_CARDS_WRITE,
    AUDIT_READ,
];

const EDITOR_PERMISSIONS: &[&str] = &[CATALOG_READ, CATALOG_WRITE, ORDERS_READ];

const VIEWER_PERMISSIONS: &[&str] = &[ORDERS_READ, CATALOG_READ, DISCOUNTS_READ, GIFT_CARDS_READ];

/// Permissions granted to a role; unknown roles get none.
pub fn permissions_for_role(role: &str) -> &'static [&'static str] {
    match role {
        Roles::SUPER_ADMIN => SUPER_ADMIN_PERMISSIONS,
        Roles::ADMIN => ADMIN_PERMISSIONS,
        Roles::EDITOR => EDITOR_PERMISSIONS,
        Roles::VIEWER => VIEWER_PERMISSIONS,
        _ => &[],
    }
}

pub fn is_known_role(role: &str) -> bool {
    matches!(
        role,
        Roles::SUPER_ADMIN | Roles::ADMIN | Roles::EDITOR | Roles::VIEWER
    )
}

/// Checks `*`, `resource:*` and exact grants.
pub fn role_has_permission(role: &str, required: &str) -> bool {
    let resource = required.split(':').next().unwrap_or(required);
    permissions_for_role(role).iter().any(|granted| {
        *granted == ALL
            || *granted == required
            || granted
                .strip_suffix(":*")
                .map_or(false, |prefix| prefix == resource)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_admin_has_everything() {
        assert!(role_has_permission(Roles::SUPER_ADMIN, AUDIT_READ));
        assert!(role_has_permission(Roles::SUPER_ADMIN, "anything:else"));
    }

    #[test]
    fn role_grants() {
        assert!(role_has_permission(Roles::ADMIN, ORDERS_UPDATE));
        assert!(role_has_permission(Roles::ADMIN, AUDIT_READ));
        assert!(role_has_permission(Roles::EDITOR, CATALOG_WRITE));
        assert!(!role_has_permission(Roles::EDITOR, ORDERS_UPDATE));
        assert!(role_has_permission(Roles::VIEWER, ORDERS_READ));
        assert!(!role_has_permission(Roles::VIEWER, CATALOG_WRITE));
        assert!(!role_has_permission("intern", ORDERS_READ));
    }
}

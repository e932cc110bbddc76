//! crates/review_bot_core/src/access.rs
//!
//! One authorization predicate for every privileged operation. Identities in the
//! configured allow-list always pass; everyone else is judged by their persisted role.

use std::collections::HashSet;

use crate::domain::AdminRole;
use crate::ports::{DatabaseService, PortResult};

/// The privilege an operation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Admin,
    SuperAdmin,
}

#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    super_admins: HashSet<i64>,
}

impl Authorizer {
    pub fn new(super_admins: impl IntoIterator<Item = i64>) -> Self {
        Self {
            super_admins: super_admins.into_iter().collect(),
        }
    }

    /// True for identities in the configured allow-list.
    pub fn is_configured_super_admin(&self, tg_id: i64) -> bool {
        self.super_admins.contains(&tg_id)
    }

    /// Configured super admins in ascending order.
    pub fn configured_super_admins(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.super_admins.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Pure decision given the identity's persisted role, if any.
    pub fn grants(&self, tg_id: i64, persisted: Option<AdminRole>, level: AccessLevel) -> bool {
        if self.is_configured_super_admin(tg_id) {
            return true;
        }
        match (level, persisted) {
            (AccessLevel::Admin, Some(_)) => true,
            (AccessLevel::SuperAdmin, Some(AdminRole::SuperAdmin)) => true,
            _ => false,
        }
    }

    /// Looks up the persisted role only when the allow-list does not already decide.
    pub async fn is_privileged(
        &self,
        db: &dyn DatabaseService,
        tg_id: i64,
        level: AccessLevel,
    ) -> PortResult<bool> {
        if self.is_configured_super_admin(tg_id) {
            return Ok(true);
        }
        let role = db.get_admin(tg_id).await?.map(|a| a.role);
        Ok(self.grants(tg_id, role, level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_identity_passes_every_level() {
        let auth = Authorizer::new([42]);
        assert!(auth.grants(42, None, AccessLevel::Admin));
        assert!(auth.grants(42, None, AccessLevel::SuperAdmin));
    }

    #[test]
    fn persisted_roles_are_ranked() {
        let auth = Authorizer::new([42]);
        assert!(auth.grants(7, Some(AdminRole::Admin), AccessLevel::Admin));
        assert!(!auth.grants(7, Some(AdminRole::Admin), AccessLevel::SuperAdmin));
        assert!(auth.grants(7, Some(AdminRole::SuperAdmin), AccessLevel::SuperAdmin));
        assert!(!auth.grants(7, None, AccessLevel::Admin));
    }
}

/// Account store
///
/// Holds every member's point balance together with the role and status
/// flags the ledger consults before moving points.

mod store;

pub use store::AccountStore;
pub(crate) use store::{apply_delta, apply_delta_floored, debit_if_covered, load_account};

use crate::error::{RewardsError, RewardsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account roles, ordered by clearance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Regular,
    Cashier,
    Manager,
    Superuser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Regular => "regular",
            Role::Cashier => "cashier",
            Role::Manager => "manager",
            Role::Superuser => "superuser",
        }
    }

    pub fn from_str(s: &str) -> RewardsResult<Self> {
        match s.to_lowercase().as_str() {
            "regular" => Ok(Role::Regular),
            "cashier" => Ok(Role::Cashier),
            "manager" => Ok(Role::Manager),
            "superuser" => Ok(Role::Superuser),
            _ => Err(RewardsError::Validation(format!("Invalid role: {}", s))),
        }
    }

    /// Check if this role clears operations requiring `required`
    pub fn meets(&self, required: Role) -> bool {
        *self >= required
    }
}

/// Member account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub utorid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub points: i64,
    pub verified: bool,
    /// Only meaningful for cashiers
    pub suspicious: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Whether purchases this account processes are suppressed
    pub fn is_suspicious_cashier(&self) -> bool {
        self.role == Role::Cashier && self.suspicious
    }
}

/// The authenticated account performing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub utorid: String,
    pub role: Role,
}

impl Actor {
    /// Fail with `Authorization` unless the actor's role clears `required`
    pub fn require(&self, required: Role) -> RewardsResult<()> {
        if self.role.meets(required) {
            Ok(())
        } else {
            Err(RewardsError::Authorization(format!(
                "Requires {} role or higher",
                required.as_str()
            )))
        }
    }
}

impl From<&Account> for Actor {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            utorid: account.utorid.clone(),
            role: account.role,
        }
    }
}

/// Account registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub utorid: String,
    pub name: String,
    pub email: String,
}

/// Partial update of an account's status flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAccountRequest {
    pub verified: Option<bool>,
    pub suspicious: Option<bool>,
    pub role: Option<Role>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_hierarchy() {
        assert!(Role::Superuser > Role::Manager);
        assert!(Role::Manager > Role::Cashier);
        assert!(Role::Cashier > Role::Regular);

        assert!(Role::Manager.meets(Role::Cashier));
        assert!(Role::Cashier.meets(Role::Cashier));
        assert!(!Role::Cashier.meets(Role::Manager));
        assert!(!Role::Regular.meets(Role::Cashier));
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!(Role::from_str("cashier").unwrap(), Role::Cashier);
        assert_eq!(Role::from_str("MANAGER").unwrap(), Role::Manager);
        assert!(Role::from_str("admin").is_err());
    }

    #[test]
    fn test_actor_require() {
        let actor = Actor {
            id: 1,
            utorid: "cashier1".to_string(),
            role: Role::Cashier,
        };
        assert!(actor.require(Role::Regular).is_ok());
        assert!(matches!(
            actor.require(Role::Manager),
            Err(RewardsError::Authorization(_))
        ));
    }
}

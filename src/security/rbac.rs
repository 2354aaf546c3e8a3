//! Role-based access control.
//!
//! Each operation declares the set of roles allowed to perform it; a caller
//! passes when it holds at least one of them. An empty set admits any
//! authenticated caller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{MlError, Result};

/// User roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Manages users and retires models
    Administrator,
    /// Trains and predicts on synthetic data
    Testing,
    /// Trains and predicts on uploaded data
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Administrator => write!(f, "administrator"),
            Role::Testing => write!(f, "testing"),
            Role::User => write!(f, "user"),
        }
    }
}

impl FromStr for Role {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "administrator" | "administrador" | "admin" => Ok(Role::Administrator),
            "testing" => Ok(Role::Testing),
            "user" | "usuario" => Ok(Role::User),
            other => Err(MlError::ValidationError(format!("Unknown role '{}'", other))),
        }
    }
}

/// Guarded operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    TrainSynthetic,
    PredictSynthetic,
    TrainReal,
    PredictReal,
    ListModels,
    DeleteModel,
    ViewDashboard,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::TrainSynthetic,
        Operation::PredictSynthetic,
        Operation::TrainReal,
        Operation::PredictReal,
        Operation::ListModels,
        Operation::DeleteModel,
        Operation::ViewDashboard,
    ];
}

/// An authenticated caller as resolved by the identity layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    pub roles: BTreeSet<Role>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Required roles per operation
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    required: HashMap<Operation, BTreeSet<Role>>,
}

impl AccessPolicy {
    /// Policy with no requirements at all
    pub fn open() -> Self {
        Self {
            required: HashMap::new(),
        }
    }

    /// Replace the role set for one operation
    pub fn with_requirement(mut self, operation: Operation, roles: impl IntoIterator<Item = Role>) -> Self {
        self.required.insert(operation, roles.into_iter().collect());
        self
    }

    pub fn required_roles(&self, operation: Operation) -> BTreeSet<Role> {
        self.required.get(&operation).cloned().unwrap_or_default()
    }

    pub fn is_allowed(&self, caller: &Caller, operation: Operation) -> bool {
        match self.required.get(&operation) {
            Some(roles) if !roles.is_empty() => roles.iter().any(|r| caller.has_role(*r)),
            _ => true,
        }
    }

    /// Fails with [`MlError::Forbidden`] naming the accepted roles
    pub fn authorize(&self, caller: &Caller, operation: Operation) -> Result<()> {
        if self.is_allowed(caller, operation) {
            return Ok(());
        }
        let required = self
            .required_roles(operation)
            .iter()
            .map(Role::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        warn!(user = %caller.user_id, operation = ?operation, required = %required, "Access denied");
        Err(MlError::Forbidden { required })
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::open()
            .with_requirement(Operation::TrainSynthetic, [Role::Testing])
            .with_requirement(Operation::PredictSynthetic, [Role::Testing])
            .with_requirement(Operation::TrainReal, [Role::User])
            .with_requirement(Operation::PredictReal, [Role::User])
            .with_requirement(Operation::DeleteModel, [Role::Administrator])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = AccessPolicy::default();
        let tester = Caller::new("t", [Role::Testing]);
        let user = Caller::new("u", [Role::User]);
        let admin = Caller::new("a", [Role::Administrator]);

        assert!(policy.is_allowed(&tester, Operation::TrainSynthetic));
        assert!(!policy.is_allowed(&tester, Operation::TrainReal));
        assert!(policy.is_allowed(&user, Operation::PredictReal));
        assert!(!policy.is_allowed(&user, Operation::DeleteModel));
        assert!(policy.is_allowed(&admin, Operation::DeleteModel));
        // roles do not imply one another
        assert!(!policy.is_allowed(&admin, Operation::TrainSynthetic));

        for caller in [&tester, &user, &admin] {
            assert!(policy.is_allowed(caller, Operation::ListModels));
            assert!(policy.is_allowed(caller, Operation::ViewDashboard));
        }
    }

    #[test]
    fn test_forbidden_names_roles() {
        let policy = AccessPolicy::default().with_requirement(Operation::TrainReal, [Role::User, Role::Testing]);
        let nobody = Caller::new("n", Vec::<Role>::new());
        match policy.authorize(&nobody, Operation::TrainReal) {
            Err(MlError::Forbidden { required }) => assert_eq!(required, "testing, user"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(policy.authorize(&Caller::new("t", [Role::Testing]), Operation::TrainReal).is_ok());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Administrador".parse::<Role>().unwrap(), Role::Administrator);
        assert_eq!("Usuario".parse::<Role>().unwrap(), Role::User);
        assert_eq!("testing".parse::<Role>().unwrap(), Role::Testing);
        assert!("root".parse::<Role>().is_err());
    }
}

// Security module - role gate for training, prediction and model management
pub mod rbac;

pub use rbac::{AccessPolicy, Caller, Operation, Role};

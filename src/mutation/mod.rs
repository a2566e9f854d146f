//! Writes to the backend with optimistic cache updates and rollback.

mod ops;
mod runner;
mod state;

pub use ops::Mutations;
pub use runner::{MutationRunner, OptimisticContext, OptimisticMutation, SettlePolicy, Settlement};
pub use state::{MutationState, TrackedMutation};

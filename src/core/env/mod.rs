//! # Environment Lifecycle
//!
//! Developer environments (`linux-container`, `local-checkout`, `remote`)
//! behind one capability interface.
//!
//! - **`models`**: identifiers, states and the persisted descriptor.
//! - **`store`**: one JSON record per environment, written atomically.
//! - **`lock`**: the per-environment advisory lock.
//! - **`manager`**: the state machine that ties the above to a backend.
//! - **`backends`**: the backend trait and its implementations.

pub mod backends;
pub mod lock;
pub mod manager;
pub mod models;
pub mod store;

pub use manager::{EnvError, EnvManager};
pub use models::{EnvironmentDescriptor, EnvironmentId, EnvironmentState, EnvironmentType};

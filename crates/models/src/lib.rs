pub mod errors;
pub mod health;
pub mod history;
pub mod job;
pub mod lease;

pub use errors::*;
pub use health::*;
pub use history::*;
pub use job::*;
pub use lease::*;

/// Common identifier type (jobs, leases). Opaque string on the wire.
pub type Id = String;

/// Fresh opaque identifier.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

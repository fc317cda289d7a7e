//! Shared types for the intent solver.
//!
//! Every crate in the workspace exchanges data through the types defined
//! here: discovered intents and their lifecycle, raw chain events, transactions
//! and receipts, rule outcomes, observability events and the configuration
//! schema helpers used to validate implementation-specific TOML tables.

pub mod account;
pub mod delivery;
pub mod discovery;
pub mod events;
pub mod intent;
pub mod rules;
pub mod utils;
pub mod validation;

pub use account::*;
pub use delivery::*;
pub use discovery::*;
pub use events::*;
pub use intent::*;
pub use rules::*;
pub use utils::*;
pub use validation::*;

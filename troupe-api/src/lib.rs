//! # Troupe Actor Runtime API
//!
//! Contract types shared between the `troupe` runtime and its collaborators
//! (HTTP front-ends, service registries, serialization adapters). The runtime
//! crate implements the behaviour; this crate only defines what crosses the
//! boundary:
//!
//! - [`types`]: type-erased payload aliases
//! - [`errors`]: the runtime error vocabulary
//! - [`info`]: built-in introspection commands and their reply shapes
//! - [`verbosity`]: log severity and verbosity model
//!
//! Collaborators depend on this crate alone when all they need is to name
//! payloads, inspect an actor, or map log levels.

pub mod errors;
pub mod info;
pub mod types;
pub mod verbosity;

pub use errors::ActorError;
pub use info::{ActorCommands, CommandInfo, GetInfo, GetStatus, Status};
pub use types::{ActorResult, BoxedMessage};
pub use verbosity::{Severity, UnsupportedSeverity, Verbosity};

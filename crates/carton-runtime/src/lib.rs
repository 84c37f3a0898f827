//! Carton Runtime Library
//!
//! The load-time half of Carton: detects an archive payload appended to the
//! running executable, reconstructs the virtual overlay filesystem, resolves
//! module requests against it with node_modules precedence, applies the
//! package's extraction policy, and hands the startup script to a script
//! engine.

pub mod actions;
pub mod error;
pub mod extract;
pub mod hostmark;
pub mod loader;
pub mod resolver;
pub mod store;
pub mod vroot;

pub use error::LoaderError;
pub use extract::{ExtractError, ExtractReport};
pub use loader::{
    BootOptions, BootOutcome, BootStatus, Loader, ResolvedStartup, ScriptEngine,
};
pub use resolver::{Location, ResolveError, Resolved, ResolverContext};
pub use store::SourceStore;
pub use vroot::{RetryBudget, SharedTree, VirtualRootTree};

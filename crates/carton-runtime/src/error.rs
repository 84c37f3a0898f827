//! Runtime error taxonomy.

use thiserror::Error;

use carton_pack::archive::ArchiveError;

use crate::actions::ActionError;
use crate::extract::ExtractError;
use crate::resolver::ResolveError;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("no package payload found in '{0}'")]
    NoPayload(String),

    #[error("startup script '{0}' is not embedded in the package")]
    StartupMissing(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("script engine error: {0}")]
    Engine(String),

    #[error("loader io error: {0}")]
    Io(#[from] std::io::Error),
}

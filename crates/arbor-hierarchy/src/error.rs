use arbor_core::{ItemId, Path};

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, HierarchyError>;

/// Errors produced by hierarchy resolution.
///
/// The same kinds are returned whether or not the path cache was involved;
/// the cache is invisible in the error contract.
#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("no item exists at path {path}")]
    PathNotFound { path: Path },

    #[error("item {id} does not exist")]
    ItemNotFound { id: ItemId },

    #[error("authoritative store failure: {0}")]
    Store(#[from] StoreError),
}

impl HierarchyError {
    pub(crate) fn path_not_found(path: &Path) -> Self {
        Self::PathNotFound { path: path.clone() }
    }

    pub(crate) fn item_not_found(id: impl Into<ItemId>) -> Self {
        Self::ItemNotFound { id: id.into() }
    }
}

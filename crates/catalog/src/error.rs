use thiserror::Error;

use entitle_core::ItemId;
use entitle_infra::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("no item identifiers given")]
    NoIdentifiers,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An item whose platform type tag is not one we know how to sell.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("item {item_id} has unrecognized type tag {type_tag:?}")]
pub struct ClassificationError {
    pub item_id: ItemId,
    pub type_tag: String,
}

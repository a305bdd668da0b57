mod abort;
mod db_interface;
pub mod location;
pub mod records;
pub mod store;

pub use abort::AbortHandle;
pub use db_interface::{ErrorDetails, ErrorLayer, IndexError, Result};
pub use location::{KeyFlags, Location, LocationRenderer, PathCache};
pub use store::{ReadGuard, Store, StoreIterator, StoreKind, StoreRead, WriteGuard};

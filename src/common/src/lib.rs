pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, CopyTimestamps, SystemClock};
pub use error::{IndexError, StoreError};
pub use index::{CopyIndex, DisownedCursor, SortOrder};
pub use model::{CopyRecord, EventKind, ObjectEvent, RecordId};
pub use storage::ObjectStorage;

pub mod offsets;

pub use offsets::{OffsetRecord, OffsetStore, StorageError};

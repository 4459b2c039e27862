pub mod memory;
pub mod traits;

pub use memory::{InMemoryBlobService, InMemoryBlobStore};
pub use traits::{BlobBody, BlobStore, CopyHandle, CopySource, CopyStatus, SignedReference};

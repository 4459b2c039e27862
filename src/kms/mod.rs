pub mod memory;
pub mod traits;

pub use memory::InMemoryKms;
pub use traits::{KeyHandle, KeyManagementService};

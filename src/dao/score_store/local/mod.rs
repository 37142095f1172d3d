mod error;
mod store;

#[allow(unused_imports)]
pub use error::{LocalResult, LocalStoreError};
pub use store::LocalScoreStore;

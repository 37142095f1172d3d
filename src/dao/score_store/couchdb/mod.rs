mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
#[allow(unused_imports)]
pub use error::{CouchDaoError, CouchResult};
pub use store::CouchScoreStore;

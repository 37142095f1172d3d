use super::error::{CouchDaoError, CouchResult};

/// Database holding player and score documents when `COUCH_DB` is unset.
pub const DEFAULT_SCORE_DATABASE: &str = "start_lights";

const ENV_URL: &str = "COUCH_BASE_URL";
const ENV_DATABASE: &str = "COUCH_DB";
const ENV_USERNAME: &str = "COUCH_USERNAME";
const ENV_PASSWORD: &str = "COUCH_PASSWORD";

/// Basic-auth pair sent with every score store request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchCredentials {
    pub username: String,
    pub password: String,
}

/// Where the CouchDB score store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub credentials: Option<CouchCredentials>,
}

impl CouchConfig {
    /// Point at `base_url`, storing scores in [`DEFAULT_SCORE_DATABASE`].
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: DEFAULT_SCORE_DATABASE.to_owned(),
            credentials: None,
        }
    }

    /// Read `COUCH_BASE_URL`, then `COUCH_DB`, `COUCH_USERNAME` and
    /// `COUCH_PASSWORD` when present.
    pub fn from_env() -> CouchResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> CouchResult<Self> {
        let present = |var| lookup(var).filter(|value: &String| !value.trim().is_empty());

        let base_url = present(ENV_URL).ok_or(CouchDaoError::MissingEnvVar { var: ENV_URL })?;
        let mut config = Self::new(base_url);
        if let Some(database) = present(ENV_DATABASE) {
            config.database = database;
        }

        config.credentials = match (present(ENV_USERNAME), present(ENV_PASSWORD)) {
            (Some(username), Some(password)) => Some(CouchCredentials { username, password }),
            (None, None) => None,
            (Some(_), None) => return Err(CouchDaoError::MissingEnvVar { var: ENV_PASSWORD }),
            (None, Some(_)) => return Err(CouchDaoError::MissingEnvVar { var: ENV_USERNAME }),
        };

        Ok(config)
    }
}

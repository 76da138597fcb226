use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB session store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save session config `{id}`")]
    SaveConfig {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load session configs")]
    LoadConfigs {
        #[source]
        source: MongoError,
    },
    #[error("failed to save session `{id}`")]
    SaveSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load sessions")]
    LoadSessions {
        #[source]
        source: MongoError,
    },
    #[error("failed to update score of session `{id}`")]
    RecordScore {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to save registration of user `{user_id}` to session `{session_id}`")]
    SaveRegistration {
        session_id: Uuid,
        user_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load registrations of session `{session_id}`")]
    LoadRegistrations {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to append press of user `{user_id}` to session `{session_id}`")]
    AppendPress {
        session_id: Uuid,
        user_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load presses of session `{session_id}`")]
    LoadPresses {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("document `{id}` in `{collection}` holds an invalid identifier")]
    CorruptedDocument {
        collection: &'static str,
        id: String,
        #[source]
        source: uuid::Error,
    },
}

use thiserror::Error;

/// Errors surfaced by the cache, the status documents and the remote collaborator.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection, timeout or a failed move/copy/delete/expunge on the remote store.
    #[error("Remote store error: {0:#}")]
    Remote(#[from] anyhow::Error),

    /// A remote id of zero (or a missing id) reached a code path that would persist it.
    #[error("Invalid remote id in folder {folder}")]
    InvalidIdentity { folder: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Both the move and the copy+delete fallback failed; the messages stay in `from`.
    #[error("Could not move {count} message(s) from {from} to {dest}")]
    MoveFailed {
        from: String,
        dest: String,
        count: usize,
    },

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// An action from the starred view named an id that is starred in more
    /// than one folder; the caller has to name the folder.
    #[error("Starred id {uid} exists in several folders: {}", folders.join(", "))]
    AmbiguousStarred { uid: u32, folders: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// src/core/metadata.rs

//! Identity of a pooled client: who uses it, for which database, and for what purpose.

use crate::core::RediscopeError;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Prefix of every connection name this library registers with `CLIENT SETNAME`.
pub const CONNECTION_NAME_GLOBAL_PREFIX: &str = "rediscope";

/// The logical purpose a client is opened for. Different purposes never share a connection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ClientContext {
    Common,
    Browser,
    Workbench,
    Cli,
    Monitor,
    Profiler,
    PubSub,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub user_id: String,
    pub session_id: String,
}

impl SessionMetadata {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// Identifies one logical client in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub session_metadata: SessionMetadata,
    pub database_id: String,
    pub context: ClientContext,
    /// Logical database index selected on the connection, when not the profile default.
    #[serde(default)]
    pub db: Option<u32>,
    #[serde(default)]
    pub unique_id: Option<String>,
}

impl ClientMetadata {
    pub fn new(
        session_metadata: SessionMetadata,
        database_id: impl Into<String>,
        context: ClientContext,
    ) -> Self {
        Self {
            session_metadata,
            database_id: database_id.into(),
            context,
            db: None,
            unique_id: None,
        }
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Derives the registry id.
    ///
    /// CLI clients keep one connection across `SELECT`, so their `db` is not part of the id.
    pub fn id(&self) -> String {
        let db = match self.context {
            ClientContext::Cli => None,
            _ => self.db,
        };
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.database_id,
            self.context,
            self.session_metadata.user_id,
            self.session_metadata.session_id,
            db.map(|d| d.to_string()).unwrap_or_default(),
            self.unique_id.as_deref().unwrap_or_default(),
        )
    }

    /// Checks that every field required to pool a client is populated.
    pub fn validate(&self) -> Result<(), RediscopeError> {
        let missing = [
            ("databaseId", self.database_id.is_empty()),
            ("sessionMetadata.userId", self.session_metadata.user_id.is_empty()),
            (
                "sessionMetadata.sessionId",
                self.session_metadata.session_id.is_empty(),
            ),
        ]
        .into_iter()
        .filter_map(|(name, is_missing)| is_missing.then_some(name))
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RediscopeError::InvalidClientMetadata(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    /// The name announced with `CLIENT SETNAME`, e.g. `rediscope-browser-3f2a9c1d`.
    pub fn connection_name(&self) -> String {
        let short_id: String = self.database_id.chars().take(8).collect();
        format!("{CONNECTION_NAME_GLOBAL_PREFIX}-{}-{short_id}", self.context)
    }
}

/// A partial key over `ClientMetadata`. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientQuery {
    pub user_id: Option<String>,
    pub database_id: Option<String>,
    pub context: Option<ClientContext>,
    pub db: Option<u32>,
}

impl ClientQuery {
    pub fn for_database(database_id: impl Into<String>) -> Self {
        Self {
            database_id: Some(database_id.into()),
            ..Default::default()
        }
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn context(mut self, context: ClientContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn db(mut self, db: u32) -> Self {
        self.db = Some(db);
        self
    }

    pub fn matches(&self, metadata: &ClientMetadata) -> bool {
        self.user_id
            .as_ref()
            .is_none_or(|u| *u == metadata.session_metadata.user_id)
            && self
                .database_id
                .as_ref()
                .is_none_or(|d| *d == metadata.database_id)
            && self.context.is_none_or(|c| c == metadata.context)
            && self.db.is_none_or(|db| metadata.db == Some(db))
    }
}

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    ButtonPressEntity, RegistrationEntity, SessionConfigEntity, SessionEntity,
};

pub const SESSION_COLLECTION: &str = "sessions";
pub const CONFIG_COLLECTION: &str = "session_configs";
pub const REGISTRATION_COLLECTION: &str = "registrations";
pub const PRESS_COLLECTION: &str = "button_presses";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfigDocument {
    #[serde(rename = "_id")]
    id: String,
    countdown_seconds: u32,
    button_press_seconds: u32,
    button_press_timeout_seconds: u32,
    score_window_seconds: u32,
    #[serde(default)]
    is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    community_id: String,
    scheduled_at: DateTime,
    ends_at: DateTime,
    config_id: String,
    current_score: u32,
    final_score: Option<u32>,
    created_by: String,
    started_by: Option<String>,
    created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRegistrationDocument {
    session_id: String,
    user_id: String,
    registered_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPressDocument {
    session_id: String,
    user_id: String,
    pressed_at: DateTime,
}

fn parse_id(collection: &'static str, raw: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|source| MongoDaoError::CorruptedDocument {
        collection,
        id: raw.to_owned(),
        source,
    })
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

impl From<SessionConfigEntity> for MongoConfigDocument {
    fn from(value: SessionConfigEntity) -> Self {
        Self {
            id: value.id.to_string(),
            countdown_seconds: value.countdown_seconds,
            button_press_seconds: value.button_press_seconds,
            button_press_timeout_seconds: value.button_press_timeout_seconds,
            score_window_seconds: value.score_window_seconds,
            is_default: value.is_default,
        }
    }
}

impl TryFrom<MongoConfigDocument> for SessionConfigEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoConfigDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(CONFIG_COLLECTION, &value.id)?,
            countdown_seconds: value.countdown_seconds,
            button_press_seconds: value.button_press_seconds,
            button_press_timeout_seconds: value.button_press_timeout_seconds,
            score_window_seconds: value.score_window_seconds,
            is_default: value.is_default,
        })
    }
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            community_id: value.community_id.to_string(),
            scheduled_at: DateTime::from_system_time(value.scheduled_at),
            ends_at: DateTime::from_system_time(value.ends_at),
            config_id: value.config_id.to_string(),
            current_score: value.current_score,
            final_score: value.final_score,
            created_by: value.created_by.to_string(),
            started_by: value.started_by.map(|id| id.to_string()),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        let parse = |raw: &str| parse_id(SESSION_COLLECTION, raw);
        Ok(Self {
            id: parse(&value.id)?,
            community_id: parse(&value.community_id)?,
            scheduled_at: value.scheduled_at.to_system_time(),
            ends_at: value.ends_at.to_system_time(),
            config_id: parse(&value.config_id)?,
            current_score: value.current_score,
            final_score: value.final_score,
            created_by: parse(&value.created_by)?,
            started_by: value.started_by.as_deref().map(parse).transpose()?,
            created_at: value.created_at.to_system_time(),
        })
    }
}

impl From<RegistrationEntity> for MongoRegistrationDocument {
    fn from(value: RegistrationEntity) -> Self {
        Self {
            session_id: value.session_id.to_string(),
            user_id: value.user_id.to_string(),
            registered_at: DateTime::from_system_time(value.registered_at),
        }
    }
}

impl TryFrom<MongoRegistrationDocument> for RegistrationEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRegistrationDocument) -> MongoResult<Self> {
        Ok(Self {
            session_id: parse_id(REGISTRATION_COLLECTION, &value.session_id)?,
            user_id: parse_id(REGISTRATION_COLLECTION, &value.user_id)?,
            registered_at: value.registered_at.to_system_time(),
        })
    }
}

impl From<ButtonPressEntity> for MongoPressDocument {
    fn from(value: ButtonPressEntity) -> Self {
        Self {
            session_id: value.session_id.to_string(),
            user_id: value.user_id.to_string(),
            pressed_at: DateTime::from_system_time(value.pressed_at),
        }
    }
}

impl TryFrom<MongoPressDocument> for ButtonPressEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPressDocument) -> MongoResult<Self> {
        Ok(Self {
            session_id: parse_id(PRESS_COLLECTION, &value.session_id)?,
            user_id: parse_id(PRESS_COLLECTION, &value.user_id)?,
            pressed_at: value.pressed_at.to_system_time(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn session_document_keeps_identifiers() {
        let scheduled_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let entity = SessionEntity {
            id: Uuid::new_v4(),
            community_id: Uuid::new_v4(),
            scheduled_at,
            ends_at: scheduled_at + Duration::from_secs(30),
            config_id: Uuid::new_v4(),
            current_score: 3,
            final_score: None,
            created_by: Uuid::new_v4(),
            started_by: Some(Uuid::new_v4()),
            created_at: scheduled_at,
        };

        let document = MongoSessionDocument::from(entity.clone());
        assert_eq!(SessionEntity::try_from(document).unwrap(), entity);
    }

    #[test]
    fn invalid_identifier_is_reported() {
        let document = MongoPressDocument {
            session_id: "not-a-uuid".into(),
            user_id: Uuid::new_v4().to_string(),
            pressed_at: DateTime::now(),
        };
        assert!(matches!(
            ButtonPressEntity::try_from(document),
            Err(MongoDaoError::CorruptedDocument {
                collection: PRESS_COLLECTION,
                ..
            })
        ));
    }
}

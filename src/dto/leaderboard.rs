use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    dao::models::SessionEntity,
    dto::{format_system_time, format_time},
    state::hub::FinalScore,
};

/// Filters of the final score listing.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FinalScoreQuery {
    /// Restrict to one community.
    pub community_id: Option<Uuid>,
    /// Maximum number of rows; capped by configuration.
    pub limit: Option<usize>,
}

/// One ended session and its frozen score.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct FinalScoreEntry {
    pub session_id: Uuid,
    pub community_id: Uuid,
    pub final_score: u32,
    /// End of the button phase, RFC 3339.
    pub ended_at: String,
}

impl From<&FinalScore> for FinalScoreEntry {
    fn from(value: &FinalScore) -> Self {
        Self {
            session_id: value.session_id,
            community_id: value.community_id,
            final_score: value.final_score,
            ended_at: format_time(value.ended_at),
        }
    }
}

impl FinalScoreEntry {
    /// Row of a stored session; `None` while its score is not frozen.
    pub fn from_entity(entity: &SessionEntity) -> Option<Self> {
        entity.final_score.map(|final_score| Self {
            session_id: entity.id,
            community_id: entity.community_id,
            final_score,
            ended_at: format_system_time(entity.ends_at),
        })
    }
}

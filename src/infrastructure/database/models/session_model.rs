use chrono::NaiveDate;
use diesel::prelude::*;

use crate::domain::entities::SessionInfo;
use crate::infrastructure::database::schema::sessions;

#[derive(Debug, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(id))]
pub struct SessionModel {
    pub id: i32,
    pub session_name: String,
    pub file_name: String,
    pub session_date: NaiveDate,
    pub transcript_token_count: Option<i32>,
}

impl From<SessionModel> for SessionInfo {
    fn from(model: SessionModel) -> Self {
        SessionInfo {
            id: model.id,
            session_name: model.session_name,
            file_name: model.file_name,
            date: model.session_date,
            transcript_token_count: model.transcript_token_count,
        }
    }
}

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::users;

/// The minimal, safe projection of a backend user that is attached to a
/// live connection and echoed back in `authenticated`.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SafeUser {
    pub id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub role: String,
    pub avatar_url: Option<String>,
}

use std::collections::HashMap;

use async_trait::async_trait;
use diesel::prelude::*;
use parking_lot::RwLock;

use crate::db::pool::DbPool;
use crate::db::schema::users;
use crate::error::Error;
use crate::models::user::SafeUser;

/// Lookup of safe user profiles, used once per successful authentication.
///
/// Backed by the backend's PostgreSQL `users` table in production and an
/// in-memory map in tests.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_safe_user(&self, user_id: i64) -> Result<Option<SafeUser>, Error>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgUserDirectory {
    db: DbPool,
}

impl PgUserDirectory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_safe_user(&self, user_id: i64) -> Result<Option<SafeUser>, Error> {
        let mut conn = self.db.get().await?;

        let user = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(SafeUser::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(user)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests and local runs)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<i64, SafeUser>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: SafeUser) {
        self.users.write().insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_safe_user(&self, user_id: i64) -> Result<Option<SafeUser>, Error> {
        Ok(self.users.read().get(&user_id).cloned())
    }
}

use crate::db::{DbPool, OrmConn};

/// Shared handler state: the raw sqlx pool (auth, audit) and the SeaORM
/// connection (catalog, cart, orders).
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
}

pub use pool::*;
pub use store::*;

pub mod pool;
pub mod store;

/// Embedded migrations: the jobs table plus its update-notification trigger.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

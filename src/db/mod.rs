//! Database connection pool module.
//!
//! Provides async PostgreSQL connection pooling using diesel_async with bb8,
//! and the embedded schema migrations for the job store tables.

mod pool;

pub use pool::{
    AsyncDbPool, MIGRATIONS, establish_async_connection_pool, run_pending_migrations,
};

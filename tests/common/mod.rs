use chrono::Local;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use lotfolio::db::{self, DbPool};

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Creates a throwaway on-disk database under ./tests/output with migrations
/// applied. Each call gets its own file so tests can run in parallel.
pub fn get_db_connection_pool() -> Arc<DbPool> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let unique = format!(
        "{}_{}_{}",
        stamp,
        std::process::id(),
        DB_COUNTER.fetch_add(1, Ordering::SeqCst)
    );
    let db_path = format!("./tests/output/{}/test.db", unique);
    db::init(&db_path).expect("Failed to initialize test database")
}

pub mod connection;
pub mod migrate;

#[cfg(test)]
pub(crate) fn test_pool(dir: &std::path::Path) -> connection::DbPool {
    let pool = connection::create_pool(&dir.join("state.db")).unwrap();
    migrate::migrate(&pool).unwrap();
    pool
}

use orderhub_api::db::DbConfig;
use orderhub_api::AppConfig;

/// Database settings for PostgreSQL-backed tests, from the `ORDERHUB_DB_*`
/// variables over the defaults.
pub fn test_db_config() -> DbConfig {
    AppConfig::load_with(None, |key| std::env::var(key).ok())
        .expect("valid test configuration")
        .database
}

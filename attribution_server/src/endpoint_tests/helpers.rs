use attribution_engine::{
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    SqliteDatabase,
};

/// Creates a fresh, migrated test database for one endpoint test.
pub async fn setup_db(name: &str) -> SqliteDatabase {
    let url = random_db_path(&format!("server_{name}"));
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

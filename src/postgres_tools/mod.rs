use crate::error::HeadwayError;
use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::pooled_connection::RecyclingMethod;
use diesel_async::pooled_connection::bb8::Pool;
use std::env;

/// Shared connection pool for the reconciliation store. Clones cheaply, so
/// the binary hands one around by value.
pub type HeadwayPostgresPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

pub async fn make_async_pool() -> Result<HeadwayPostgresPool, HeadwayError> {
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| HeadwayError::Pool("DATABASE_URL must be set".to_string()))?;

    let mut manager_config = ManagerConfig::default();
    manager_config.recycling_method = RecyclingMethod::Fast;

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
        database_url,
        manager_config,
    );

    // the batch loop is strictly sequential, so the pool stays small
    Pool::builder()
        .max_size(8)
        .min_idle(Some(1))
        .build(manager)
        .await
        .map_err(|err| HeadwayError::Pool(err.to_string()))
}

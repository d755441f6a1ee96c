/// Application context and dependency injection
use crate::{
    account::AccountStore,
    clock::{Clock, SystemClock},
    config::ServerConfig,
    db,
    error::RewardsResult,
    event::{EventManager, EventPointPool},
    ledger::Ledger,
    promotion::PromotionCatalog,
    rate_limit::RateLimiter,
    redemption::RedemptionProcessor,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub clock: Arc<dyn Clock>,
    pub accounts: Arc<AccountStore>,
    pub promotions: Arc<PromotionCatalog>,
    pub ledger: Arc<Ledger>,
    pub events: Arc<EventManager>,
    pub event_pool: Arc<EventPointPool>,
    pub redemptions: Arc<RedemptionProcessor>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> RewardsResult<Self> {
        config.validate()?;

        let options = db::DatabaseOptions {
            max_connections: config.storage.max_connections,
            ..Default::default()
        };
        let pool = db::create_pool(&config.storage.database, options).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        tracing::info!(database = %config.storage.database.display(), "database ready");

        Ok(Self::with_pool(config, pool, Arc::new(SystemClock)))
    }

    /// Wire services over an existing pool and clock
    pub fn with_pool(config: ServerConfig, pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        let ledger_config = config.ledger.clone();
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Self {
            accounts: Arc::new(AccountStore::new(pool.clone())),
            promotions: Arc::new(PromotionCatalog::new(pool.clone(), clock.clone())),
            ledger: Arc::new(Ledger::new(pool.clone(), clock.clone(), ledger_config.clone())),
            events: Arc::new(EventManager::new(
                pool.clone(),
                clock.clone(),
                ledger_config.clone(),
            )),
            event_pool: Arc::new(EventPointPool::new(pool.clone())),
            redemptions: Arc::new(RedemptionProcessor::new(pool.clone(), ledger_config)),
            rate_limiter,
            config: Arc::new(config),
            db: pool,
            clock,
        }
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}

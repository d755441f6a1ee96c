/// Campus Rewards server binary
use campus_rewards::{
    account::Role,
    config::{ServerConfig, DEFAULT_LOG_FILTER},
    context::AppContext,
    error::RewardsResult,
    server, RewardsError,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> RewardsResult<()> {
    let config = ServerConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bootstrap = config.authentication.bootstrap_superuser.clone();

    let ctx = AppContext::new(config).await?;

    if let Some(account) = bootstrap {
        match ctx
            .accounts
            .seed(&account.utorid, &account.utorid, &account.email, Role::Superuser)
            .await
        {
            Ok(seeded) => tracing::info!(utorid = %seeded.utorid, "bootstrap superuser created"),
            Err(RewardsError::Conflict(_)) => {
                tracing::debug!(utorid = %account.utorid, "bootstrap superuser already exists")
            }
            Err(e) => return Err(e),
        }
    }

    server::serve(ctx).await
}

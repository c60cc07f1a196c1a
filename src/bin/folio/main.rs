use anyhow::Context;
use folio_counter::{
    app::{AppData, RuntimeData},
    config::Config,
    server,
    stars::{GitHubApi, StarCache, StarsProvider},
    store::{KvStore, MemoryStore, RedisStore},
    views::ViewCounter,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load().with_context(|| "fail to load config")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let app_data = prepare_app_data(config)?;
    server::serve(app_data).await
}

fn prepare_store(config: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    match &config.redis {
        Some(redis) => {
            tracing::info!("using redis at {}:{}", redis.host, redis.port);
            Ok(Arc::new(RedisStore::open(&redis.url())?))
        }
        None => {
            tracing::warn!("no redis configured, views are kept in memory and lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn prepare_github(config: &Config) -> anyhow::Result<Arc<dyn StarsProvider>> {
    let github = GitHubApi::new(&config.github.api_base, config.github.token.as_deref())
        .with_context(|| "fail to create github client")?;
    Ok(Arc::new(github))
}

fn prepare_app_data(config: Config) -> anyhow::Result<AppData> {
    let store = prepare_store(&config)?;
    let counter = ViewCounter::new(Arc::clone(&store)).with_salt(config.dedup_salt.clone());
    let stars = StarCache::new(Arc::clone(&store), prepare_github(&config)?);

    let data = RuntimeData::builder()
        .config(config)
        .store(store)
        .counter(counter)
        .stars(stars)
        .build();

    Ok(data.into())
}

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::stars::{StarCache, StarsProvider};
use crate::store::KvStore;
use crate::views::ViewCounter;

/// Shared handle to everything a request needs. Cloning only bumps the reference count.
pub struct AppData(Arc<RuntimeData>);

impl From<RuntimeData> for AppData {
    fn from(data: RuntimeData) -> Self {
        Self(Arc::new(data))
    }
}

impl Clone for AppData {
    fn clone(&self) -> Self {
        AppData(Arc::clone(&self.0))
    }
}

impl Deref for AppData {
    type Target = Arc<RuntimeData>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(typed_builder::TypedBuilder)]
pub struct RuntimeData {
    pub config: Config,
    pub store: Arc<dyn KvStore>,
    pub counter: ViewCounter,
    pub stars: StarCache<Arc<dyn StarsProvider>>,
}

impl RuntimeData {
    pub fn stars_ttl(&self) -> Duration {
        Duration::from_secs(self.config.stars_ttl_secs)
    }

    /// Release the store connection. Called once the server stopped taking requests.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }
}

//! Proxy Startup
//!
//! Builds a Redis-backed proxy from loaded settings.

use std::sync::Arc;

use crate::config::Settings;
use crate::proxy::KvProxy;
use crate::shared::error::ProxyResult;

/// Connects the configured Redis stores and starts the proxy.
///
/// Both stores are created here, so the proxy owns them and closes them on
/// `KvProxy::close`.
pub async fn build_proxy(settings: &Settings) -> ProxyResult<Arc<KvProxy>> {
    let mut builder = KvProxy::builder(settings.proxy.to_options()).write_url(&settings.redis.url);
    if let Some(read_url) = &settings.redis.read_url {
        builder = builder.read_url(read_url);
    }

    let proxy = builder.build().await?;
    tracing::info!(
        separate_reads = settings.redis.read_url.is_some(),
        "Storage proxy ready"
    );
    Ok(Arc::new(proxy))
}

//! Proxy construction.
//!
//! Store handles are either injected by the caller, in which case the proxy
//! never closes them, or created here from a Redis URL, in which case the
//! proxy owns them and closes them on `KvProxy::close`.

use std::sync::Arc;

use tracing::warn;

use super::options::ProxyOptions;
use super::KvProxy;
use crate::infrastructure::store::{create_redis_store, BackingStore};
use crate::shared::error::{ProxyError, ProxyResult};

/// A backing store together with whether the proxy owns its lifecycle.
#[derive(Clone)]
pub(crate) struct StoreHandle {
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) owned: bool,
}

impl StoreHandle {
    pub(crate) fn owned(store: Arc<dyn BackingStore>) -> Self {
        Self { store, owned: true }
    }

    pub(crate) fn borrowed(store: Arc<dyn BackingStore>) -> Self {
        Self {
            store,
            owned: false,
        }
    }
}

enum StoreSource {
    Injected(Arc<dyn BackingStore>),
    Url(String),
}

/// Builder for [`KvProxy`].
///
/// # Example
/// ```rust,ignore
/// let proxy = KvProxy::builder(ProxyOptions::default())
///     .write_url("redis://localhost:6379")
///     .read_url("redis://replica:6379")
///     .build()
///     .await?;
/// ```
pub struct KvProxyBuilder {
    options: ProxyOptions,
    write: Option<StoreSource>,
    read: Option<StoreSource>,
}

impl KvProxyBuilder {
    pub fn new(options: ProxyOptions) -> Self {
        Self {
            options,
            write: None,
            read: None,
        }
    }

    /// Uses an existing store for writes. The proxy will not close it.
    pub fn write_store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.write = Some(StoreSource::Injected(store));
        self
    }

    /// Uses an existing store for reads. The proxy will not close it.
    pub fn read_store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.read = Some(StoreSource::Injected(store));
        self
    }

    /// Connects a proxy-owned Redis store for writes.
    pub fn write_url(mut self, url: impl Into<String>) -> Self {
        self.write = Some(StoreSource::Url(url.into()));
        self
    }

    /// Connects a proxy-owned Redis store for reads.
    pub fn read_url(mut self, url: impl Into<String>) -> Self {
        self.read = Some(StoreSource::Url(url.into()));
        self
    }

    /// Validates the options, opens the stores and starts the workers.
    ///
    /// Without a read store, reads go to the write store.
    pub async fn build(self) -> ProxyResult<KvProxy> {
        self.options.validate()?;

        let write = match self.write {
            Some(source) => open(source).await?,
            None => {
                return Err(ProxyError::InvalidConfig(
                    "a write store or write URL is required".into(),
                ))
            }
        };

        let read = match self.read {
            Some(source) => match open(source).await {
                Ok(handle) => Some(handle),
                Err(err) => {
                    if write.owned {
                        if let Err(close_err) = write.store.close().await {
                            warn!(error = %close_err, "Failed to close write store after read store failure");
                        }
                    }
                    return Err(err);
                }
            },
            None => None,
        };

        KvProxy::start(self.options, write, read)
    }
}

async fn open(source: StoreSource) -> ProxyResult<StoreHandle> {
    match source {
        StoreSource::Injected(store) => Ok(StoreHandle::borrowed(store)),
        StoreSource::Url(url) => {
            let store = create_redis_store(&url)
                .await
                .map_err(ProxyError::Construction)?;
            Ok(StoreHandle::owned(Arc::new(store)))
        }
    }
}

use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::Url;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

pub const SOLAR_POWER: &str = "SolarPower";
pub const WH_TODAY: &str = "WHToday";
pub const VCC_BATT: &str = "VCCBatt";
pub const HOUSE_POWER: &str = "HousePower";
pub const DATE_TIME: &str = "DateTime";

/// Key-value store shared with the microcontroller. Last write wins.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Returns `None` when the key has never been written.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Arduino Yún Bridge, reached through its REST interface.
///
/// `GET /data/get/<key>` answers `{"value":"..","key":"..","response":"get"}`
/// and `GET /data/put/<key>/<value>` stores a value.
pub struct BridgeStore {
    base_url: Url,
    client: reqwest::Client,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

impl BridgeStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let parsed =
            Url::parse(base_url).map_err(|_| StoreError::InvalidUrl(base_url.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            base_url: parsed,
            client: reqwest::Client::new(),
        })
    }

    fn url_for(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, key: &str, url: Url) -> Result<BridgeResponse, StoreError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                key: key.to_string(),
                status,
            });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
    }
}

#[async_trait]
impl SharedStore for BridgeStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let url = self.url_for(&["data", "get", key])?;
        Ok(self.request(key, url).await?.value)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let url = self.url_for(&["data", "put", key, value])?;
        self.request(key, url).await?;
        Ok(())
    }
}

/// In-process store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.value(key))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Serves the values in `overrides` and reads every other key from `fallback`.
/// Writes go to the overrides only.
pub struct OverlayStore<S> {
    overrides: MemoryStore,
    fallback: S,
}

impl<S: SharedStore> OverlayStore<S> {
    pub fn new(overrides: MemoryStore, fallback: S) -> Self {
        Self {
            overrides,
            fallback,
        }
    }
}

#[async_trait]
impl<S: SharedStore> SharedStore for OverlayStore<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.overrides.value(key) {
            Some(value) => Ok(Some(value)),
            None => self.fallback.get(key).await,
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.overrides.put(key, value).await
    }
}

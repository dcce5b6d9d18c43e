use log::{info, warn};
use thiserror::Error;

use crate::types::{BuildMarker, Credentials};

pub const WIFI_NAMESPACE: &str = "wifi";
pub const WIFI_SSID_KEY: &str = "ssid";
pub const WIFI_PASS_KEY: &str = "pass";

pub const BUILD_NAMESPACE: &str = "build";
pub const BUILD_MARKER_KEY: &str = "marker";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("network name and secret are both required")]
    Incomplete,
}

/// String pairs grouped in named namespaces that survive power loss.
pub trait KeyValueStore {
    fn get(&mut self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StoreError>;
}

pub struct CredentialStore<S> {
    backend: S,
    cached: Credentials,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            cached: Credentials::absent(),
        }
    }

    pub fn load(&mut self) -> Credentials {
        let network_name = self.read_key(WIFI_NAMESPACE, WIFI_SSID_KEY);
        let secret = self.read_key(WIFI_NAMESPACE, WIFI_PASS_KEY);

        let loaded = Credentials::new(network_name, secret);
        self.cached = if loaded.is_present() {
            loaded
        } else {
            Credentials::absent()
        };
        self.cached.clone()
    }

    pub fn save(&mut self, credentials: Credentials) -> Result<(), StoreError> {
        if !credentials.is_present() {
            return Err(StoreError::Incomplete);
        }

        self.backend
            .put(WIFI_NAMESPACE, WIFI_SSID_KEY, &credentials.network_name)?;
        self.backend
            .put(WIFI_NAMESPACE, WIFI_PASS_KEY, &credentials.secret)?;
        info!("saved credentials for `{}`", credentials.network_name);

        self.cached = credentials;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.cached = Credentials::absent();
        self.backend.remove(WIFI_NAMESPACE, WIFI_SSID_KEY)?;
        self.backend.remove(WIFI_NAMESPACE, WIFI_PASS_KEY)?;
        info!("stored credentials cleared");
        Ok(())
    }

    pub fn cached(&self) -> &Credentials {
        &self.cached
    }

    /// Wipes credentials the first time a new build boots. Returns whether a wipe happened.
    pub fn detect_and_handle_first_boot(&mut self, current: &BuildMarker) -> bool {
        let persisted = self.read_key(BUILD_NAMESPACE, BUILD_MARKER_KEY);
        if persisted == current.as_str() {
            return false;
        }

        info!(
            "first boot of build `{}` (previous `{}`); clearing credentials",
            current.as_str(),
            persisted
        );

        if let Err(err) = self.clear() {
            warn!("failed to clear credentials on first boot: {err}");
        }
        if let Err(err) = self
            .backend
            .put(BUILD_NAMESPACE, BUILD_MARKER_KEY, current.as_str())
        {
            warn!("failed to persist build marker: {err}");
        }
        true
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    fn read_key(&mut self, namespace: &str, key: &str) -> String {
        match self.backend.get(namespace, key) {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                warn!("failed to read {namespace}/{key}: {err}");
                String::new()
            }
        }
    }
}

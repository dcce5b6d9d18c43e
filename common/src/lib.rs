pub mod aggregator;
pub mod config;
pub mod connectivity;
pub mod credentials;
pub mod device;
pub mod pages;
pub mod portal;
pub mod reporter;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod testing;

pub use aggregator::TemperatureBus;
pub use config::{AccessPointConfig, ReporterConfig};
pub use connectivity::{ConnectivityManager, Radio, RadioError};
pub use credentials::{CredentialStore, KeyValueStore, StoreError};
pub use device::{Cycle, Device, DeviceContext, RestartReason};
pub use pages::{render, RenderedPage};
pub use portal::{PortalError, PortalRequest, PortalResponse, CAPTIVE_PROBE_PATHS};
pub use reporter::{HttpResponse, HttpTransport, Reporter, TransportError};
pub use scheduler::UploadScheduler;
pub use types::{
    BuildMarker, ConnectivityState, Credentials, DeviceIdentity, SensorReading, UploadOutcome,
    DISCONNECTED_C, INVALID_READING_C,
};

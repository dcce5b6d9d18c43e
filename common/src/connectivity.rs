use log::{info, warn};
use thiserror::Error;

use crate::{
    config::{AccessPointConfig, ReporterConfig},
    types::{ConnectivityState, Credentials, DeviceIdentity},
};

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("no link after {0} ms")]
    Timeout(u64),
    #[error("radio driver error: {0}")]
    Driver(String),
}

/// The wireless radio, in either access-point or station mode.
pub trait Radio {
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError>;

    /// Joins `credentials.network_name` and blocks until the link is up or `timeout_ms` passes.
    fn connect_station(
        &mut self,
        credentials: &Credentials,
        hostname: &str,
        timeout_ms: u64,
    ) -> Result<(), RadioError>;

    fn disconnect(&mut self);

    fn is_connected(&mut self) -> bool;

    /// RSSI in dBm of the joined network.
    fn signal_strength(&mut self) -> Option<i8>;
}

#[derive(Debug, Clone)]
pub struct ConnectivityManager {
    state: ConnectivityState,
    credentials: Credentials,
    identity: DeviceIdentity,
    hostname_prefix: String,
    hostname: Option<String>,
    access_point: AccessPointConfig,
    connect_timeout_ms: u64,
    link_losses: u32,
}

impl ConnectivityManager {
    pub fn new(identity: DeviceIdentity, config: &ReporterConfig) -> Self {
        Self {
            state: ConnectivityState::Unprovisioned,
            credentials: Credentials::absent(),
            identity,
            hostname_prefix: config.hostname_prefix.clone(),
            hostname: None,
            access_point: config.access_point.clone(),
            connect_timeout_ms: config.connect_timeout_ms,
            link_losses: 0,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn is_operating(&self) -> bool {
        self.state == ConnectivityState::Operating
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn access_point(&self) -> &AccessPointConfig {
        &self.access_point
    }

    pub fn link_losses(&self) -> u32 {
        self.link_losses
    }

    /// Boot entry: joins the stored network or falls back to the setup access point.
    pub fn start<R: Radio + ?Sized>(
        &mut self,
        radio: &mut R,
        credentials: Credentials,
    ) -> ConnectivityState {
        self.credentials = credentials;

        if self.credentials.is_present() {
            self.connect(radio);
        } else {
            info!("no stored credentials");
            self.enter_provisioning(radio);
        }
        self.state
    }

    /// One bounded station attempt with the cached credentials.
    pub fn connect<R: Radio + ?Sized>(&mut self, radio: &mut R) -> bool {
        if !self.credentials.is_present() {
            self.enter_provisioning(radio);
            return false;
        }

        self.transition(ConnectivityState::Connecting);
        let hostname = self
            .hostname
            .get_or_insert_with(|| self.identity.hostname(&self.hostname_prefix))
            .clone();

        info!(
            "joining `{}` as `{}` (timeout {} ms)",
            self.credentials.network_name, hostname, self.connect_timeout_ms
        );

        match radio.connect_station(&self.credentials, &hostname, self.connect_timeout_ms) {
            Ok(()) => {
                self.transition(ConnectivityState::Operating);
                true
            }
            Err(err) => {
                warn!(
                    "could not join `{}`: {err}",
                    self.credentials.network_name
                );
                radio.disconnect();
                self.enter_provisioning(radio);
                false
            }
        }
    }

    /// Checks the station link; a dropped link gets exactly one reconnect attempt.
    pub fn ensure_link<R: Radio + ?Sized>(&mut self, radio: &mut R) -> bool {
        if self.state != ConnectivityState::Operating {
            return false;
        }
        if radio.is_connected() {
            return true;
        }

        self.link_losses = self.link_losses.saturating_add(1);
        warn!("station link lost; attempting one reconnect");
        radio.disconnect();
        self.connect(radio)
    }

    pub fn begin_reconfigure(&mut self) {
        self.transition(ConnectivityState::Reconfiguring);
        self.credentials = Credentials::absent();
    }

    fn enter_provisioning<R: Radio + ?Sized>(&mut self, radio: &mut R) {
        self.transition(ConnectivityState::Unprovisioned);

        match radio.start_access_point(&self.access_point) {
            Ok(()) => info!(
                "setup access point `{}` up at {}.{}.{}.{}",
                self.access_point.ssid,
                self.access_point.address[0],
                self.access_point.address[1],
                self.access_point.address[2],
                self.access_point.address[3]
            ),
            Err(err) => warn!(
                "failed to start setup access point `{}`: {err}",
                self.access_point.ssid
            ),
        }
    }

    fn transition(&mut self, next: ConnectivityState) {
        if self.state != next {
            info!("connectivity {} -> {}", self.state.as_str(), next.as_str());
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{FakeRadio, RadioCall};

    fn manager() -> ConnectivityManager {
        ConnectivityManager::new(DeviceIdentity::new(4242), &ReporterConfig::default())
    }

    #[test]
    fn no_credentials_starts_access_point() {
        let mut radio = FakeRadio::default();
        let mut conn = manager();

        let state = conn.start(&mut radio, Credentials::absent());

        assert_eq!(state, ConnectivityState::Unprovisioned);
        assert_eq!(
            radio.calls,
            vec![RadioCall::AccessPoint("TempLink-Setup".to_string())]
        );
    }

    #[test]
    fn successful_join_reaches_operating_with_derived_hostname() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = manager();

        let state = conn.start(&mut radio, Credentials::new("Home", "secret1"));

        assert_eq!(state, ConnectivityState::Operating);
        assert_eq!(conn.hostname(), Some("templink-4242"));
        assert_eq!(
            radio.calls,
            vec![RadioCall::Station {
                ssid: "Home".to_string(),
                hostname: "templink-4242".to_string(),
                timeout_ms: 30_000,
            }]
        );
    }

    #[test]
    fn wrong_secret_falls_back_to_access_point() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = manager();

        let state = conn.start(&mut radio, Credentials::new("Home", "wrong"));

        assert_eq!(state, ConnectivityState::Unprovisioned);
        assert!(radio.access_point_active());
    }

    #[test]
    fn healthy_link_needs_no_reconnect() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = manager();
        conn.start(&mut radio, Credentials::new("Home", "secret1"));
        radio.calls.clear();

        assert!(conn.ensure_link(&mut radio));
        assert!(radio.calls.is_empty());
        assert_eq!(conn.link_losses(), 0);
    }

    #[test]
    fn dropped_link_recovers_with_single_attempt() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = manager();
        conn.start(&mut radio, Credentials::new("Home", "secret1"));
        radio.drop_link();
        radio.calls.clear();

        assert!(conn.ensure_link(&mut radio));
        assert_eq!(conn.state(), ConnectivityState::Operating);
        assert_eq!(radio.station_attempts(), 1);
        assert_eq!(conn.hostname(), Some("templink-4242"));
    }

    #[test]
    fn begin_reconfigure_drops_cached_credentials() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = manager();
        conn.start(&mut radio, Credentials::new("Home", "secret1"));

        conn.begin_reconfigure();

        assert_eq!(conn.state(), ConnectivityState::Reconfiguring);
        assert_eq!(conn.credentials(), &Credentials::absent());
        assert!(!conn.ensure_link(&mut radio));
    }
}

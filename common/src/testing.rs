use std::collections::BTreeMap;

use crate::{
    aggregator::TemperatureBus,
    config::AccessPointConfig,
    connectivity::{Radio, RadioError},
    credentials::{KeyValueStore, StoreError, WIFI_NAMESPACE, WIFI_SSID_KEY},
    reporter::{HttpResponse, HttpTransport, TransportError},
    types::Credentials,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<(String, String), String>,
    removals_of_ssid: usize,
    pub fail_reads: bool,
}

impl MemoryStore {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of times the stored network name was erased.
    pub fn clears(&self) -> usize {
        self.removals_of_ssid
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&mut self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Backend("flash read error".to_string()));
        }
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        if namespace == WIFI_NAMESPACE && key == WIFI_SSID_KEY {
            self.removals_of_ssid += 1;
        }
        self.entries
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    AccessPoint(String),
    Station {
        ssid: String,
        hostname: String,
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Off,
    AccessPoint,
    Station,
}

#[derive(Debug, Clone)]
pub struct FakeRadio {
    accept: Option<Credentials>,
    mode: Mode,
    connected: bool,
    pub calls: Vec<RadioCall>,
}

impl Default for FakeRadio {
    fn default() -> Self {
        Self {
            accept: None,
            mode: Mode::Off,
            connected: false,
            calls: Vec::new(),
        }
    }
}

impl FakeRadio {
    pub fn accepting(ssid: &str, secret: &str) -> Self {
        Self {
            accept: Some(Credentials::new(ssid, secret)),
            ..Default::default()
        }
    }

    pub fn drop_link(&mut self) {
        self.connected = false;
    }

    pub fn reject_all(&mut self) {
        self.accept = None;
    }

    pub fn access_point_active(&self) -> bool {
        self.mode == Mode::AccessPoint
    }

    pub fn station_attempts(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, RadioCall::Station { .. }))
            .count()
    }
}

impl Radio for FakeRadio {
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError> {
        self.calls.push(RadioCall::AccessPoint(config.ssid.clone()));
        self.mode = Mode::AccessPoint;
        self.connected = false;
        Ok(())
    }

    fn connect_station(
        &mut self,
        credentials: &Credentials,
        hostname: &str,
        timeout_ms: u64,
    ) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Station {
            ssid: credentials.network_name.clone(),
            hostname: hostname.to_string(),
            timeout_ms,
        });
        self.mode = Mode::Station;

        if self.accept.as_ref() == Some(credentials) {
            self.connected = true;
            Ok(())
        } else {
            Err(RadioError::Timeout(timeout_ms))
        }
    }

    fn disconnect(&mut self) {
        self.mode = Mode::Off;
        self.connected = false;
    }

    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn signal_strength(&mut self) -> Option<i8> {
        self.connected.then_some(-61)
    }
}

#[derive(Debug, Clone)]
pub struct FakeBus {
    values: Vec<f32>,
    pub conversions: usize,
}

impl FakeBus {
    pub fn new(values: &[f32]) -> Self {
        Self {
            values: values.to_vec(),
            conversions: 0,
        }
    }
}

impl TemperatureBus for FakeBus {
    fn request_conversion(&mut self) {
        self.conversions += 1;
    }

    fn device_count(&mut self) -> usize {
        self.values.len()
    }

    fn temperature_c(&mut self, index: usize) -> f32 {
        self.values[index]
    }
}

#[derive(Debug, Clone)]
pub struct FakeTransport {
    response: Result<HttpResponse, String>,
    pub requests: Vec<String>,
}

impl FakeTransport {
    pub fn responding(status: u16, body: &str) -> Self {
        Self {
            response: Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
            requests: Vec::new(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            requests: Vec::new(),
        }
    }
}

impl HttpTransport for FakeTransport {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
        self.requests.push(url.to_string());
        self.response.clone().map_err(TransportError::Request)
    }
}

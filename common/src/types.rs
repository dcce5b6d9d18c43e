use serde::Serialize;

/// Value a probe reports when it did not answer a conversion request.
pub const DISCONNECTED_C: f32 = -127.0;

/// Reported upstream when no probe produced a usable value.
pub const INVALID_READING_C: f32 = DISCONNECTED_C;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pin: u32,
}

impl DeviceIdentity {
    pub fn new(pin: u32) -> Self {
        Self { pin }
    }

    /// Low three octets of the factory MAC, the usual 24-bit chip id.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        Self::new(u32::from_be_bytes([0, mac[3], mac[4], mac[5]]))
    }

    pub fn pin(self) -> u32 {
        self.pin
    }

    pub fn hostname(self, prefix: &str) -> String {
        format!("{prefix}-{}", self.pin)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub network_name: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(network_name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            secret: secret.into(),
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_present(&self) -> bool {
        !self.network_name.is_empty() && !self.secret.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMarker(String);

impl BuildMarker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Unprovisioned,
    Connecting,
    Operating,
    Reconfiguring,
}

impl ConnectivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unprovisioned => "UNPROVISIONED",
            Self::Connecting => "CONNECTING",
            Self::Operating => "OPERATING",
            Self::Reconfiguring => "RECONFIGURING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature_c: f32,
    pub sensor_count: usize,
}

impl SensorReading {
    pub fn invalid(sensor_count: usize) -> Self {
        Self {
            temperature_c: INVALID_READING_C,
            sensor_count,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.temperature_c != INVALID_READING_C
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub succeeded: bool,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: u64,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct UploadCounters {
    pub successful_uploads: u64,
    pub last_upload_succeeded: bool,
    pub last_outcome: Option<UploadOutcome>,
}

impl UploadCounters {
    pub fn record(&mut self, outcome: UploadOutcome) {
        if outcome.succeeded {
            self.successful_uploads = self.successful_uploads.saturating_add(1);
        }
        self.last_upload_succeeded = outcome.succeeded;
        self.last_outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_uses_low_mac_octets() {
        let identity = DeviceIdentity::from_mac([0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56]);
        assert_eq!(identity.pin(), 0x12_34_56);
        assert_eq!(identity.hostname("templink"), "templink-1193046");
    }

    #[test]
    fn partial_credentials_are_not_present() {
        assert!(!Credentials::new("Home", "").is_present());
        assert!(!Credentials::new("", "secret1").is_present());
        assert!(Credentials::new("Home", "secret1").is_present());
    }

    #[test]
    fn failed_outcome_leaves_counter_untouched() {
        let mut counters = UploadCounters::default();
        counters.record(UploadOutcome {
            succeeded: true,
            timestamp_ms: 10,
            status_code: Some(200),
            body: "OK".to_string(),
        });
        counters.record(UploadOutcome {
            succeeded: false,
            timestamp_ms: 20,
            status_code: Some(503),
            body: String::new(),
        });

        assert_eq!(counters.successful_uploads, 1);
        assert!(!counters.last_upload_succeeded);
        assert_eq!(counters.last_outcome.unwrap().status_code, Some(503));
    }
}

use serde::Deserialize;

pub const DEFAULT_REPORT_URL: &str = "http://report.templink.net/api/v1/report";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AccessPointConfig {
    pub ssid: String,
    pub password: String,
    pub address: [u8; 4],
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: "TempLink-Setup".to_string(),
            password: "templink".to_string(),
            address: [192, 168, 4, 1],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    pub report_url: String,
    pub normal_interval_ms: u64,
    pub short_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub loop_idle_ms: u64,
    pub restart_grace_ms: u64,
    pub hostname_prefix: String,
    pub http_port: u16,
    #[serde(default)]
    pub access_point: AccessPointConfig,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            report_url: DEFAULT_REPORT_URL.to_string(),
            normal_interval_ms: 300_000,
            short_interval_ms: 60_000,
            connect_timeout_ms: 30_000,
            http_timeout_ms: 15_000,
            loop_idle_ms: 100,
            restart_grace_ms: 500,
            hostname_prefix: "templink".to_string(),
            http_port: 80,
            access_point: AccessPointConfig::default(),
        }
    }
}

impl ReporterConfig {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if self.report_url.trim().is_empty() {
            self.report_url = defaults.report_url;
        }

        self.normal_interval_ms = self.normal_interval_ms.clamp(10_000, 86_400_000);
        self.short_interval_ms = self
            .short_interval_ms
            .clamp(5_000, self.normal_interval_ms);
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(5_000, 120_000);
        self.http_timeout_ms = self.http_timeout_ms.clamp(1_000, 60_000);
        self.loop_idle_ms = self.loop_idle_ms.clamp(10, 1_000);
        self.restart_grace_ms = self.restart_grace_ms.min(5_000);

        if self.hostname_prefix.trim().is_empty() {
            self.hostname_prefix = defaults.hostname_prefix;
        }
        if self.http_port == 0 {
            self.http_port = defaults.http_port;
        }

        // WPA2 secrets are 8..=63 characters.
        let pass_len = self.access_point.password.len();
        if self.access_point.ssid.trim().is_empty() || !(8..=63).contains(&pass_len) {
            self.access_point = defaults.access_point;
        }
    }

    pub fn access_point_url(&self) -> String {
        let [a, b, c, d] = self.access_point.address;
        if self.http_port == 80 {
            format!("http://{a}.{b}.{c}.{d}/")
        } else {
            format!("http://{a}.{b}.{c}.{d}:{}/", self.http_port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_interval_never_exceeds_normal() {
        let mut config = ReporterConfig {
            normal_interval_ms: 30_000,
            short_interval_ms: 120_000,
            ..Default::default()
        };
        config.sanitize();

        assert_eq!(config.short_interval_ms, 30_000);
    }

    #[test]
    fn unusable_access_point_falls_back_to_documented_one() {
        let mut config = ReporterConfig::default();
        config.access_point.password = "short".to_string();
        config.sanitize();

        assert_eq!(config.access_point, AccessPointConfig::default());
    }

    #[test]
    fn json_without_access_point_uses_default() {
        let raw = r#"{
            "report_url": "http://example.net/r",
            "normal_interval_ms": 120000,
            "short_interval_ms": 20000,
            "connect_timeout_ms": 30000,
            "http_timeout_ms": 10000,
            "loop_idle_ms": 100,
            "restart_grace_ms": 500,
            "hostname_prefix": "lab",
            "http_port": 8080
        }"#;

        let config = ReporterConfig::from_json(raw).unwrap();
        assert_eq!(config.report_url, "http://example.net/r");
        assert_eq!(config.short_interval_ms, 20_000);
        assert_eq!(config.access_point.ssid, "TempLink-Setup");
        assert_eq!(config.access_point_url(), "http://192.168.4.1:8080/");
    }

    #[test]
    fn configured_access_point_address_is_kept() {
        let raw = r#"{
            "report_url": "http://example.net/r",
            "normal_interval_ms": 300000,
            "short_interval_ms": 60000,
            "connect_timeout_ms": 30000,
            "http_timeout_ms": 15000,
            "loop_idle_ms": 100,
            "restart_grace_ms": 500,
            "hostname_prefix": "templink",
            "http_port": 80,
            "access_point": {
                "ssid": "Lab-Setup",
                "password": "labsetup",
                "address": [10, 42, 0, 1]
            }
        }"#;

        let config = ReporterConfig::from_json(raw).unwrap();
        assert_eq!(config.access_point.address, [10, 42, 0, 1]);
        assert_eq!(config.access_point_url(), "http://10.42.0.1/");
    }
}

use log::{info, warn};
use thiserror::Error;

use crate::{
    connectivity::{ConnectivityManager, Radio},
    types::{DeviceIdentity, SensorReading, UploadCounters, UploadOutcome},
};

const MAX_OUTCOME_BODY_CHARS: usize = 256;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("response body unreadable: {0}")]
    Body(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Blocking HTTP client, bounded by its own timeout.
pub trait HttpTransport {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError>;
}

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

pub fn build_report_url(
    base: &str,
    pin: u32,
    reading: &SensorReading,
    successful_uploads: u64,
) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{separator}pin={pin}&t={:.2}&n={}&u={successful_uploads}",
        reading.temperature_c, reading.sensor_count
    )
}

#[derive(Debug, Clone)]
pub struct Reporter {
    report_url: String,
    identity: DeviceIdentity,
}

impl Reporter {
    pub fn new(report_url: impl Into<String>, identity: DeviceIdentity) -> Self {
        Self {
            report_url: report_url.into(),
            identity,
        }
    }

    /// Single upload attempt. The outcome is recorded in `counters` and returned.
    pub fn report<R, H>(
        &self,
        reading: &SensorReading,
        counters: &mut UploadCounters,
        connectivity: &mut ConnectivityManager,
        radio: &mut R,
        transport: &mut H,
        now_ms: u64,
    ) -> UploadOutcome
    where
        R: Radio + ?Sized,
        H: HttpTransport + ?Sized,
    {
        let outcome = if connectivity.ensure_link(radio) {
            self.upload(reading, counters.successful_uploads, transport, now_ms)
        } else {
            warn!(
                "upload skipped: connectivity is {}",
                connectivity.state().as_str()
            );
            UploadOutcome {
                succeeded: false,
                timestamp_ms: now_ms,
                status_code: None,
                body: "not connected".to_string(),
            }
        };

        counters.record(outcome.clone());
        outcome
    }

    fn upload<H: HttpTransport + ?Sized>(
        &self,
        reading: &SensorReading,
        successful_uploads: u64,
        transport: &mut H,
        now_ms: u64,
    ) -> UploadOutcome {
        let url = build_report_url(
            &self.report_url,
            self.identity.pin(),
            reading,
            successful_uploads,
        );
        info!("uploading {url}");

        match transport.get(&url) {
            Ok(response) => {
                let succeeded = is_success(response.status);
                if succeeded {
                    info!("upload accepted (HTTP {})", response.status);
                } else {
                    warn!("upload rejected (HTTP {})", response.status);
                }
                UploadOutcome {
                    succeeded,
                    timestamp_ms: now_ms,
                    status_code: Some(response.status),
                    body: truncate_chars(&response.body, MAX_OUTCOME_BODY_CHARS),
                }
            }
            Err(err) => {
                warn!("upload failed: {err}");
                UploadOutcome {
                    succeeded: false,
                    timestamp_ms: now_ms,
                    status_code: None,
                    body: err.to_string(),
                }
            }
        }
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((end, _)) => value[..end].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::ReporterConfig,
        testing::{FakeRadio, FakeTransport},
        types::{ConnectivityState, Credentials},
    };

    fn operating(radio: &mut FakeRadio) -> ConnectivityManager {
        let mut conn = ConnectivityManager::new(DeviceIdentity::new(77), &ReporterConfig::default());
        conn.start(radio, Credentials::new("Home", "secret1"));
        conn
    }

    #[test]
    fn url_carries_pin_temperature_count_and_uploads() {
        let reading = SensorReading {
            temperature_c: -4.5,
            sensor_count: 2,
        };
        assert_eq!(
            build_report_url("http://r.example/report", 77, &reading, 12),
            "http://r.example/report?pin=77&t=-4.50&n=2&u=12"
        );
        assert_eq!(
            build_report_url("http://r.example/report?v=1", 0, &reading, 0),
            "http://r.example/report?v=1&pin=0&t=-4.50&n=2&u=0"
        );
    }

    #[test]
    fn ok_response_increments_counter() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = operating(&mut radio);
        let mut transport = FakeTransport::responding(200, "OK");
        let mut counters = UploadCounters::default();
        let reporter = Reporter::new("http://r.example/report", DeviceIdentity::new(77));
        let reading = SensorReading {
            temperature_c: 19.2,
            sensor_count: 3,
        };

        let outcome = reporter.report(
            &reading,
            &mut counters,
            &mut conn,
            &mut radio,
            &mut transport,
            1_000,
        );

        assert!(outcome.succeeded);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(counters.successful_uploads, 1);
        assert!(counters.last_upload_succeeded);
        assert_eq!(
            transport.requests,
            vec!["http://r.example/report?pin=77&t=19.20&n=3&u=0".to_string()]
        );
    }

    #[test]
    fn server_error_is_a_failure() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = operating(&mut radio);
        let mut transport = FakeTransport::responding(500, "boom");
        let mut counters = UploadCounters::default();
        let reporter = Reporter::new("http://r.example/report", DeviceIdentity::new(77));

        let outcome = reporter.report(
            &SensorReading::invalid(0),
            &mut counters,
            &mut conn,
            &mut radio,
            &mut transport,
            1_000,
        );

        assert!(!outcome.succeeded);
        assert_eq!(outcome.body, "boom");
        assert_eq!(counters.successful_uploads, 0);
        assert_eq!(
            transport.requests,
            vec!["http://r.example/report?pin=77&t=-127.00&n=0&u=0".to_string()]
        );
    }

    #[test]
    fn transport_error_is_a_failure() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = operating(&mut radio);
        let mut transport = FakeTransport::failing("connection refused");
        let mut counters = UploadCounters::default();
        let reporter = Reporter::new("http://r.example/report", DeviceIdentity::new(77));

        let outcome = reporter.report(
            &SensorReading::invalid(0),
            &mut counters,
            &mut conn,
            &mut radio,
            &mut transport,
            1_000,
        );

        assert!(!outcome.succeeded);
        assert_eq!(outcome.status_code, None);
        assert!(!counters.last_upload_succeeded);
    }

    #[test]
    fn unreachable_network_skips_request() {
        let mut radio = FakeRadio::accepting("Home", "secret1");
        let mut conn = operating(&mut radio);
        radio.drop_link();
        radio.reject_all();
        let mut transport = FakeTransport::responding(200, "OK");
        let mut counters = UploadCounters::default();
        let reporter = Reporter::new("http://r.example/report", DeviceIdentity::new(77));

        let outcome = reporter.report(
            &SensorReading::invalid(0),
            &mut counters,
            &mut conn,
            &mut radio,
            &mut transport,
            1_000,
        );

        assert!(!outcome.succeeded);
        assert!(transport.requests.is_empty());
        assert_eq!(conn.state(), ConnectivityState::Unprovisioned);
    }

    #[test]
    fn long_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(300);
        assert_eq!(truncate_chars(&body, 256).chars().count(), 256);
        assert_eq!(truncate_chars("short", 256), "short");
    }
}

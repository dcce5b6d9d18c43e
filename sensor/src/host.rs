use std::{
    collections::BTreeMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tracing::{info, warn};

use templink_common::{
    portal::MAX_FORM_BODY, render, AccessPointConfig, BuildMarker, Credentials, Cycle, Device,
    DeviceContext, DeviceIdentity, HttpResponse, HttpTransport, KeyValueStore, PortalError,
    PortalRequest, PortalResponse, Radio, RadioError, RenderedPage, ReporterConfig, StoreError,
    TemperatureBus, TransportError, CAPTIVE_PROBE_PATHS, DISCONNECTED_C,
};

use crate::{clock::monotonic_ms, BUILD_MARKER};

type HostDevice = Device<FileStore, SimulatedRadio, SimulatedBus, ReqwestTransport>;
type SharedDevice = Arc<Mutex<HostDevice>>;

const DEFAULT_HOST_HTTP_PORT: u16 = 8080;
const SIMULATED_JOIN_DELAY_MS: u64 = 250;

/// One JSON file per namespace under the data directory.
struct FileStore {
    data_dir: PathBuf,
}

struct SimulatedRadio {
    networks: Vec<Credentials>,
    station_up: bool,
}

struct SimulatedBus {
    probes: Vec<Option<f32>>,
    tick: u64,
}

struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    let port = config.http_port;
    let data_dir = std::env::var("TEMPLINK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.templink"));

    // The blocking HTTP client owns a runtime of its own and must be built off the async workers.
    let device = tokio::task::spawn_blocking(move || build_device(config, data_dir))
        .await
        .context("device setup task panicked")??;
    let device: SharedDevice = Arc::new(Mutex::new(device));

    {
        let device = device.clone();
        thread::Builder::new()
            .name("control-loop".to_string())
            .spawn(move || control_loop(device))
            .context("failed to spawn control loop")?;
    }

    let mut app = Router::new()
        .route("/", get(handle_root))
        .route("/save", post(handle_save))
        .route("/resetwifi", get(handle_reset_page))
        .route("/confirmreset", post(handle_confirm_reset))
        .route("/api/status", get(handle_status_json));
    for path in CAPTIVE_PROBE_PATHS {
        app = app.route(path, get(handle_root));
    }
    let app = app.with_state(device);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind portal at {addr}"))?;

    info!("portal listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_device(config: ReporterConfig, data_dir: PathBuf) -> anyhow::Result<HostDevice> {
    let identity = host_identity();
    info!(
        "device pin {} (hostname `{}`)",
        identity.pin(),
        identity.hostname(&config.hostname_prefix)
    );

    let transport = ReqwestTransport::new(config.http_timeout_ms)?;
    let ctx = DeviceContext::new(identity, config, BuildMarker::new(BUILD_MARKER));
    let mut device = Device::new(
        ctx,
        FileStore { data_dir },
        SimulatedRadio::from_env(),
        SimulatedBus::from_env(),
        transport,
    );

    let state = device.boot(monotonic_ms());
    info!("boot finished in {}", state.as_str());
    Ok(device)
}

fn control_loop(device: SharedDevice) {
    loop {
        let idle_ms = {
            let mut device = lock_device(&device);
            let now_ms = monotonic_ms();

            match device.tick(now_ms) {
                Cycle::Idle => {}
                Cycle::Uploaded(outcome) if outcome.succeeded => {
                    info!("upload ok ({} total)", device.context().counters.successful_uploads);
                }
                Cycle::Uploaded(outcome) => {
                    warn!(
                        "upload failed ({}); retrying on the short interval",
                        outcome.body
                    );
                }
                Cycle::LinkLost => warn!("link lost; back in setup mode"),
                Cycle::Restart(reason) => {
                    info!("restart requested ({reason:?})");
                    let state = device.restart(now_ms);
                    info!("restart finished in {}", state.as_str());
                }
            }
            device.loop_idle_ms()
        };

        thread::sleep(Duration::from_millis(idle_ms));
    }
}

fn lock_device(device: &SharedDevice) -> MutexGuard<'_, HostDevice> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn handle_root(State(device): State<SharedDevice>) -> Response {
    respond(device, PortalRequest::Root).await
}

async fn handle_status_json(State(device): State<SharedDevice>) -> Response {
    respond(device, PortalRequest::StatusJson).await
}

async fn handle_save(State(device): State<SharedDevice>, body: String) -> Response {
    if body.len() > MAX_FORM_BODY {
        return page_response(render(&PortalResponse::bad_request(&PortalError::BodyTooLarge)));
    }
    respond(device, PortalRequest::save_from_form(&body)).await
}

async fn handle_reset_page(State(device): State<SharedDevice>) -> Response {
    respond(device, PortalRequest::ResetPage).await
}

async fn handle_confirm_reset(State(device): State<SharedDevice>) -> Response {
    respond(device, PortalRequest::ConfirmReset).await
}

/// Portal requests take the same lock as the control loop, so they wait out a running upload.
async fn respond(device: SharedDevice, request: PortalRequest) -> Response {
    let rendered = tokio::task::spawn_blocking(move || {
        let mut device = lock_device(&device);
        render(&device.handle(request, monotonic_ms()))
    })
    .await;

    match rendered {
        Ok(page) => page_response(page),
        Err(err) => {
            warn!("portal handler failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "portal handler failed").into_response()
        }
    }
}

fn page_response(page: RenderedPage) -> Response {
    (
        StatusCode::from_u16(page.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [(CONTENT_TYPE, page.content_type)],
        page.body,
    )
        .into_response()
}

fn load_config() -> anyhow::Result<ReporterConfig> {
    let mut config = match std::env::var("TEMPLINK_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {path}"))?;
            ReporterConfig::from_json(&raw)
                .with_context(|| format!("invalid config at {path}"))?
        }
        Err(_) => ReporterConfig {
            http_port: DEFAULT_HOST_HTTP_PORT,
            ..Default::default()
        },
    };

    if let Ok(url) = std::env::var("TEMPLINK_REPORT_URL") {
        config.report_url = url;
    }
    if let Some(port) = std::env::var("TEMPLINK_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }

    config.sanitize();
    Ok(config)
}

fn host_identity() -> DeviceIdentity {
    let seed = std::env::var("TEMPLINK_DEVICE_SEED")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "templink-host".to_string());

    let digest = Sha256::digest(seed.as_bytes());
    DeviceIdentity::new(u32::from_be_bytes([0, digest[0], digest[1], digest[2]]))
}

impl FileStore {
    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.data_dir.join(format!("{namespace}.json"))
    }

    fn read_namespace(&self, namespace: &str) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read(self.namespace_path(namespace)) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| StoreError::Backend(err.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(StoreError::Backend(err.to_string())),
        }
    }

    fn write_namespace(
        &self,
        namespace: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let payload =
            serde_json::to_vec_pretty(entries).map_err(|err| StoreError::Backend(err.to_string()))?;
        std::fs::write(self.namespace_path(namespace), payload)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&mut self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_namespace(namespace)?.remove(key))
    }

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.read_namespace(namespace)?;
        entries.insert(key.to_string(), value.to_string());
        self.write_namespace(namespace, &entries)
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let mut entries = self.read_namespace(namespace)?;
        if entries.remove(key).is_some() {
            self.write_namespace(namespace, &entries)?;
        }
        Ok(())
    }
}

impl SimulatedRadio {
    /// `TEMPLINK_SIM_NETWORKS=ssid:password,...`; unset accepts any credentials.
    fn from_env() -> Self {
        let networks = std::env::var("TEMPLINK_SIM_NETWORKS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|entry| entry.split_once(':'))
            .map(|(ssid, pass)| Credentials::new(ssid.trim(), pass))
            .collect();

        Self {
            networks,
            station_up: false,
        }
    }
}

impl Radio for SimulatedRadio {
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError> {
        self.station_up = false;
        info!(
            "[sim] access point `{}` (password `{}`) up",
            config.ssid, config.password
        );
        Ok(())
    }

    fn connect_station(
        &mut self,
        credentials: &Credentials,
        hostname: &str,
        timeout_ms: u64,
    ) -> Result<(), RadioError> {
        thread::sleep(Duration::from_millis(SIMULATED_JOIN_DELAY_MS.min(timeout_ms)));

        let known = self.networks.is_empty() || self.networks.contains(credentials);
        if !known {
            return Err(RadioError::Timeout(timeout_ms));
        }

        self.station_up = true;
        info!(
            "[sim] joined `{}` as `{hostname}`",
            credentials.network_name
        );
        Ok(())
    }

    fn disconnect(&mut self) {
        self.station_up = false;
    }

    fn is_connected(&mut self) -> bool {
        self.station_up
    }

    fn signal_strength(&mut self) -> Option<i8> {
        self.station_up.then_some(-55)
    }
}

impl SimulatedBus {
    /// `TEMPLINK_SIM_PROBES=21.5,x,19.2`; `x` is a probe that does not answer.
    fn from_env() -> Self {
        let probes = match std::env::var("TEMPLINK_SIM_PROBES") {
            Ok(raw) => raw
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(|entry| entry.trim().parse::<f32>().ok())
                .collect(),
            Err(_) => vec![Some(20.0)],
        };

        Self { probes, tick: 0 }
    }
}

impl TemperatureBus for SimulatedBus {
    fn request_conversion(&mut self) {
        self.tick = self.tick.saturating_add(1);
    }

    fn device_count(&mut self) -> usize {
        self.probes.len()
    }

    fn temperature_c(&mut self, index: usize) -> f32 {
        match self.probes.get(index).copied().flatten() {
            Some(base) => base + (self.tick % 8) as f32 * 0.1,
            None => DISCONNECTED_C,
        }
    }
}

impl ReqwestTransport {
    fn new(timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| TransportError::Request(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| TransportError::Body(err.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

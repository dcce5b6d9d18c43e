use core::convert::TryInto;
use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::{
    http::{client::Client as HttpClient, Headers, Method, Status},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, IOPin, InputOutput, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::{
        client::{Configuration as HttpClientConfiguration, EspHttpConnection},
        server::{Configuration as HttpConfiguration, EspHttpServer},
    },
    ipv4::{Configuration as IpConfiguration, Mask, RouterConfiguration, Subnet},
    log::EspLogger,
    netif::{EspNetif, NetifConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use one_wire_bus::{Address, OneWire};

use templink_common::{
    portal::MAX_FORM_BODY, render, AccessPointConfig, BuildMarker, Credentials, Cycle, Device,
    DeviceContext, DeviceIdentity, HttpResponse, HttpTransport, KeyValueStore, PortalError,
    PortalRequest, PortalResponse, Radio, RadioError, RenderedPage, ReporterConfig, StoreError,
    TemperatureBus, TransportError, CAPTIVE_PROBE_PATHS, DISCONNECTED_C,
};

use crate::{clock::monotonic_ms, BUILD_MARKER};

type EspDevice = Device<NvsKeyValueStore, EspRadio, Ds18b20Bus, EspHttpTransport>;
type SharedDevice = Arc<Mutex<EspDevice>>;
type ServerRequest<'a, 'b> =
    esp_idf_svc::http::server::Request<&'a mut esp_idf_svc::http::server::EspHttpConnection<'b>>;

const DS18B20_PIN: i32 = 4;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const CONNECT_POLL_MS: u64 = 250;
const MAX_RESPONSE_BODY: usize = 1024;
const NVS_VALUE_CAPACITY: usize = 128;

/// NVS namespaces map one-to-one onto the store's namespaces.
struct NvsKeyValueStore {
    partition: EspDefaultNvsPartition,
}

struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
}

struct Ds18b20Bus {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    addresses: Vec<Address>,
    delay: Ets,
}

struct EspHttpTransport {
    timeout_ms: u64,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let mut config = ReporterConfig::default();
    if let Some(url) = option_env!("TEMPLINK_REPORT_URL") {
        config.report_url = url.to_string();
    }
    config.sanitize();

    let identity = DeviceIdentity::from_mac(read_factory_mac()?);
    info!(
        "device pin {} (hostname `{}`), build {}",
        identity.pin(),
        identity.hostname(&config.hostname_prefix),
        BUILD_MARKER
    );

    let bus = Ds18b20Bus::new(pins.gpio4.downgrade()).context("failed to initialize DS18B20 bus")?;
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition.clone()))?;
    let ap_netif = EspNetif::new_with_conf(&access_point_netif_config(config.access_point.address)?)
        .context("failed to create setup access point netif")?;
    esp_wifi
        .swap_netif_ap(ap_netif)
        .context("failed to apply setup access point address")?;
    let radio = EspRadio {
        wifi: BlockingWifi::wrap(esp_wifi, sys_loop)?,
    };
    let transport = EspHttpTransport {
        timeout_ms: config.http_timeout_ms,
    };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let http_port = config.http_port;
    let ctx = DeviceContext::new(identity, config, BuildMarker::new(BUILD_MARKER));
    let mut device = Device::new(
        ctx,
        NvsKeyValueStore {
            partition: nvs_partition,
        },
        radio,
        bus,
        transport,
    );

    let state = device.boot(monotonic_ms());
    info!("boot finished in {}", state.as_str());

    let device: SharedDevice = Arc::new(Mutex::new(device));
    let _server = create_http_server(device.clone(), http_port)?;

    loop {
        feed_watchdog();

        let idle_ms = {
            let mut device = lock_device(&device);
            match device.tick(monotonic_ms()) {
                Cycle::Idle => {}
                Cycle::Uploaded(outcome) if outcome.succeeded => {
                    info!(
                        "upload ok ({} total)",
                        device.context().counters.successful_uploads
                    );
                }
                Cycle::Uploaded(outcome) => {
                    warn!(
                        "upload failed ({}); retrying on the short interval",
                        outcome.body
                    );
                }
                Cycle::LinkLost => warn!("link lost; setup access point is up"),
                Cycle::Restart(reason) => {
                    info!("restarting ({reason:?})");
                    device.radio_mut().disconnect();
                    unsafe { esp_idf_svc::sys::esp_restart() };
                }
            }
            device.loop_idle_ms()
        };

        thread::sleep(Duration::from_millis(idle_ms));
    }
}

fn lock_device(device: &SharedDevice) -> MutexGuard<'_, EspDevice> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_http_server(device: SharedDevice, port: u16) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for path in std::iter::once("/").chain(CAPTIVE_PROBE_PATHS) {
        let device = device.clone();
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            respond(req, &device, PortalRequest::Root)
        })?;
    }

    {
        let device = device.clone();
        server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
            respond(req, &device, PortalRequest::StatusJson)
        })?;
    }

    {
        let device = device.clone();
        server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
            let Some(body) = read_request_body(&mut req)? else {
                let rejected = PortalResponse::bad_request(&PortalError::BodyTooLarge);
                return write_page(req, &render(&rejected));
            };
            let request = PortalRequest::save_from_form(&String::from_utf8_lossy(&body));
            respond(req, &device, request)
        })?;
    }

    {
        let device = device.clone();
        server.fn_handler::<anyhow::Error, _>("/resetwifi", Method::Get, move |req| {
            respond(req, &device, PortalRequest::ResetPage)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/confirmreset", Method::Post, move |req| {
        respond(req, &device, PortalRequest::ConfirmReset)
    })?;

    Ok(server)
}

fn respond(req: ServerRequest<'_, '_>, device: &SharedDevice, request: PortalRequest) -> anyhow::Result<()> {
    let page = {
        let mut device = lock_device(device);
        render(&device.handle(request, monotonic_ms()))
    };
    write_page(req, &page)
}

fn write_page(req: ServerRequest<'_, '_>, page: &RenderedPage) -> anyhow::Result<()> {
    req.into_response(page.status, None, &[("Content-Type", page.content_type)])?
        .write_all(page.body.as_bytes())?;
    Ok(())
}

/// `None` when the declared body exceeds the form limit.
fn read_request_body(req: &mut ServerRequest<'_, '_>) -> anyhow::Result<Option<Vec<u8>>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_FORM_BODY {
        return Ok(None);
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(Some(body))
}

/// Router netif serving DHCP and DNS from the configured setup address on a /24.
fn access_point_netif_config(address: [u8; 4]) -> anyhow::Result<NetifConfiguration> {
    let [a, b, c, d] = address;
    let gateway = Ipv4Addr::new(a, b, c, d);

    let mut conf = NetifConfiguration::wifi_default_router();
    conf.key = "WIFI_AP_SETUP"
        .try_into()
        .map_err(|_| anyhow!("netif key too long"))?;
    conf.ip_configuration = Some(IpConfiguration::Router(RouterConfiguration {
        subnet: Subnet {
            gateway,
            mask: Mask(24),
        },
        dhcp_enabled: true,
        dns: Some(gateway),
        secondary_dns: None,
    }));

    Ok(conf)
}

fn read_factory_mac() -> anyhow::Result<[u8; 6]> {
    let mut mac = [0_u8; 6];
    let rc = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if rc == esp_idf_svc::sys::ESP_OK {
        return Ok(mac);
    }
    Err(anyhow!("esp_efuse_mac_get_default failed with code {}", rc))
}

fn backend_error(err: impl core::fmt::Debug) -> StoreError {
    StoreError::Backend(format!("{err:?}"))
}

impl KeyValueStore for NvsKeyValueStore {
    fn get(&mut self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let nvs = EspNvs::new(self.partition.clone(), namespace, true).map_err(backend_error)?;
        let mut buffer = [0_u8; NVS_VALUE_CAPACITY];
        let value = nvs.get_str(key, &mut buffer).map_err(backend_error)?;
        Ok(value.map(str::to_string))
    }

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut nvs = EspNvs::new(self.partition.clone(), namespace, true).map_err(backend_error)?;
        nvs.set_str(key, value).map_err(backend_error)
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let mut nvs = EspNvs::new(self.partition.clone(), namespace, true).map_err(backend_error)?;
        nvs.remove(key).map(|_| ()).map_err(backend_error)
    }
}

fn driver_error(err: impl core::fmt::Debug) -> RadioError {
    RadioError::Driver(format!("{err:?}"))
}

impl Radio for EspRadio {
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError> {
        let _ = self.wifi.disconnect();
        let _ = self.wifi.stop();

        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: config
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError::Driver("access point ssid too long".to_string()))?,
                password: config
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| {
                        RadioError::Driver("access point password too long".to_string())
                    })?,
                auth_method: AuthMethod::WPAWPA2Personal,
                channel: 1,
                ..Default::default()
            }))
            .map_err(driver_error)?;
        self.wifi.start().map_err(driver_error)?;
        self.wifi.wait_netif_up().map_err(driver_error)?;

        let [a, b, c, d] = config.address;
        info!(
            "setup access point `{}` (password: `{}`) up at {a}.{b}.{c}.{d}",
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
        let _ = self.wifi.stop();

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .network_name
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError::Driver("wifi ssid too long".to_string()))?,
                password: credentials
                    .secret
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError::Driver("wifi password too long".to_string()))?,
                auth_method: AuthMethod::WPAWPA2Personal,
                ..Default::default()
            }))
            .map_err(driver_error)?;

        if let Err(err) = self.wifi.wifi_mut().sta_netif_mut().set_hostname(hostname) {
            warn!("failed to set hostname `{hostname}`: {err:?}");
        }

        self.wifi.start().map_err(driver_error)?;
        self.wifi.wifi_mut().connect().map_err(driver_error)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            feed_watchdog();
            if self.wifi.wifi().is_up().unwrap_or(false) {
                disable_wifi_power_save();
                return Ok(());
            }
            thread::sleep(Duration::from_millis(CONNECT_POLL_MS));
        }

        Err(RadioError::Timeout(timeout_ms))
    }

    fn disconnect(&mut self) {
        let _ = self.wifi.disconnect();
        let _ = self.wifi.stop();
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn signal_strength(&mut self) -> Option<i8> {
        let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
        (rc == esp_idf_svc::sys::ESP_OK).then_some(ap_info.rssi)
    }
}

impl Ds18b20Bus {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut one_wire_pin = PinDriver::input_output_od(pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut bus = Self {
            one_wire,
            addresses: Vec::new(),
            delay: Ets,
        };
        bus.scan();
        Ok(bus)
    }

    fn scan(&mut self) {
        let mut found = Vec::new();

        for addr in self.one_wire.devices(false, &mut self.delay) {
            match addr {
                Ok(address) if address.family_code() == ds18b20::FAMILY_CODE => found.push(address),
                Ok(_) => {}
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        if found.len() != self.addresses.len() {
            info!("{} DS18B20 probe(s) on GPIO{}", found.len(), DS18B20_PIN);
        }
        self.addresses = found;
    }
}

impl TemperatureBus for Ds18b20Bus {
    fn request_conversion(&mut self) {
        self.scan();

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            warn!("failed to start DS18B20 conversion: {err:?}");
            return;
        }

        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);
    }

    fn device_count(&mut self) -> usize {
        self.addresses.len()
    }

    fn temperature_c(&mut self, index: usize) -> f32 {
        let Some(address) = self.addresses.get(index).copied() else {
            return DISCONNECTED_C;
        };

        let sensor = match Ds18b20::new::<core::convert::Infallible>(address) {
            Ok(sensor) => sensor,
            Err(err) => {
                warn!("invalid DS18B20 address {address:?}: {err:?}");
                return DISCONNECTED_C;
            }
        };

        match sensor.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) => data.temperature,
            Err(err) => {
                warn!("failed to read DS18B20 {address:?}: {err:?}");
                DISCONNECTED_C
            }
        }
    }
}

impl HttpTransport for EspHttpTransport {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
        let http_conf = HttpClientConfiguration {
            timeout: Some(Duration::from_millis(self.timeout_ms)),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&http_conf)
            .map_err(|err| TransportError::Request(format!("{err:?}")))?;
        let mut client = HttpClient::wrap(connection);

        let request = client
            .request(Method::Get, url, &[])
            .map_err(|err| TransportError::Request(format!("{err:?}")))?;
        let mut response = request
            .submit()
            .map_err(|err| TransportError::Request(format!("{err:?}")))?;

        let status = response.status();
        let mut body = Vec::new();
        let mut chunk = [0_u8; 256];
        while body.len() < MAX_RESPONSE_BODY {
            let read = response
                .read(&mut chunk)
                .map_err(|err| TransportError::Body(format!("{err:?}")))?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

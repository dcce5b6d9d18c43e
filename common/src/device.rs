use log::{info, warn};

use crate::{
    aggregator::{self, TemperatureBus},
    config::ReporterConfig,
    connectivity::{ConnectivityManager, Radio},
    credentials::{CredentialStore, KeyValueStore},
    portal::{validate_credentials, Page, PortalRequest, PortalResponse, SetupView, StatusView},
    reporter::{HttpTransport, Reporter},
    scheduler::UploadScheduler,
    types::{BuildMarker, ConnectivityState, DeviceIdentity, UploadCounters, UploadOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// New credentials were saved; the next boot joins them.
    CredentialsSaved,
    /// Credentials were cleared; the next boot comes up in setup mode.
    CredentialsCleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRestart {
    pub at_ms: u64,
    pub reason: RestartReason,
}

/// What one control cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum Cycle {
    Idle,
    Uploaded(UploadOutcome),
    /// The station link dropped and the reconnect failed; the setup access point is back.
    LinkLost,
    Restart(RestartReason),
}

/// Process-wide state of one boot session, owned in one place.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub identity: DeviceIdentity,
    pub config: ReporterConfig,
    pub build: BuildMarker,
    pub connectivity: ConnectivityManager,
    pub scheduler: UploadScheduler,
    pub counters: UploadCounters,
    pub reporter: Reporter,
    pub pending_restart: Option<PendingRestart>,
    pub booted_at_ms: u64,
}

impl DeviceContext {
    pub fn new(identity: DeviceIdentity, config: ReporterConfig, build: BuildMarker) -> Self {
        Self {
            connectivity: ConnectivityManager::new(identity, &config),
            scheduler: UploadScheduler::new(config.normal_interval_ms, config.short_interval_ms),
            counters: UploadCounters::default(),
            reporter: Reporter::new(config.report_url.clone(), identity),
            pending_restart: None,
            booted_at_ms: 0,
            identity,
            config,
            build,
        }
    }
}

pub struct Device<S, R, B, H> {
    ctx: DeviceContext,
    store: CredentialStore<S>,
    radio: R,
    bus: B,
    transport: H,
}

impl<S, R, B, H> Device<S, R, B, H>
where
    S: KeyValueStore,
    R: Radio,
    B: TemperatureBus,
    H: HttpTransport,
{
    pub fn new(ctx: DeviceContext, store: S, radio: R, bus: B, transport: H) -> Self {
        Self {
            ctx,
            store: CredentialStore::new(store),
            radio,
            bus,
            transport,
        }
    }

    pub fn boot(&mut self, now_ms: u64) -> ConnectivityState {
        self.ctx.booted_at_ms = now_ms;
        info!(
            "booting pin {} build `{}`",
            self.ctx.identity.pin(),
            self.ctx.build.as_str()
        );

        self.store.detect_and_handle_first_boot(&self.ctx.build);
        let credentials = self.store.load();

        let state = self.ctx.connectivity.start(&mut self.radio, credentials);
        match state {
            ConnectivityState::Operating => self.ctx.scheduler.reset(),
            _ => info!("setup portal at {}", self.ctx.config.access_point_url()),
        }
        state
    }

    /// Re-initialises every piece of session state and boots again.
    pub fn restart(&mut self, now_ms: u64) -> ConnectivityState {
        info!("restarting state machine");
        self.radio.disconnect();
        self.ctx = DeviceContext::new(
            self.ctx.identity,
            self.ctx.config.clone(),
            self.ctx.build.clone(),
        );
        self.boot(now_ms)
    }

    /// One pass of the control loop, minus serving web requests.
    pub fn tick(&mut self, now_ms: u64) -> Cycle {
        if let Some(pending) = self.ctx.pending_restart {
            if now_ms >= pending.at_ms {
                return Cycle::Restart(pending.reason);
            }
            return Cycle::Idle;
        }

        if !self.ctx.connectivity.is_operating() {
            return Cycle::Idle;
        }
        if !self.ctx.connectivity.ensure_link(&mut self.radio) {
            return Cycle::LinkLost;
        }
        if !self.ctx.scheduler.due(now_ms) {
            return Cycle::Idle;
        }

        let reading = aggregator::read(&mut self.bus);
        if reading.is_valid() {
            info!(
                "coldest of {} probe(s): {:.2}°C",
                reading.sensor_count, reading.temperature_c
            );
        } else {
            warn!(
                "no valid probe reading ({} device(s) on bus); reporting sentinel",
                reading.sensor_count
            );
        }

        let outcome = self.ctx.reporter.report(
            &reading,
            &mut self.ctx.counters,
            &mut self.ctx.connectivity,
            &mut self.radio,
            &mut self.transport,
            now_ms,
        );
        self.ctx.scheduler.record_outcome(outcome.succeeded);

        if !self.ctx.connectivity.is_operating() {
            return Cycle::LinkLost;
        }
        Cycle::Uploaded(outcome)
    }

    pub fn handle(&mut self, request: PortalRequest, now_ms: u64) -> PortalResponse {
        match request {
            PortalRequest::Root => {
                if self.ctx.connectivity.is_operating() {
                    PortalResponse::ok(Page::Status(self.status_view(now_ms)))
                } else {
                    PortalResponse::ok(Page::Setup(SetupView {
                        access_point: self.ctx.connectivity.access_point().ssid.clone(),
                        pin: self.ctx.identity.pin(),
                    }))
                }
            }
            PortalRequest::StatusJson => {
                PortalResponse::ok(Page::StatusJson(self.status_view(now_ms)))
            }
            PortalRequest::Save { ssid, password } => {
                let credentials =
                    match validate_credentials(ssid.as_deref(), password.as_deref()) {
                        Ok(credentials) => credentials,
                        Err(err) => {
                            warn!("rejected credential submission: {err}");
                            return PortalResponse::bad_request(&err);
                        }
                    };

                let network_name = credentials.network_name.clone();
                if let Err(err) = self.store.save(credentials) {
                    warn!("failed to persist credentials: {err}");
                    return PortalResponse::server_error("Failed to persist credentials");
                }

                self.schedule_restart(RestartReason::CredentialsSaved, now_ms);
                PortalResponse::ok(Page::Saved { network_name })
            }
            PortalRequest::ResetPage => PortalResponse::ok(Page::ResetConfirm),
            PortalRequest::ConfirmReset => {
                if let Err(err) = self.store.clear() {
                    warn!("failed to clear credentials: {err}");
                    return PortalResponse::server_error("Failed to clear credentials");
                }

                self.ctx.connectivity.begin_reconfigure();
                self.schedule_restart(RestartReason::CredentialsCleared, now_ms);
                PortalResponse::ok(Page::ResetAccepted)
            }
        }
    }

    pub fn status_view(&mut self, now_ms: u64) -> StatusView {
        let operating = self.ctx.connectivity.is_operating();
        let schedule = self.ctx.scheduler.state();

        StatusView {
            state: self.ctx.connectivity.state().as_str(),
            pin: self.ctx.identity.pin(),
            hostname: self.ctx.connectivity.hostname().map(str::to_string),
            network_name: self.ctx.connectivity.credentials().network_name.clone(),
            signal_dbm: if operating {
                self.radio.signal_strength()
            } else {
                None
            },
            successful_uploads: self.ctx.counters.successful_uploads,
            last_upload_succeeded: self.ctx.counters.last_upload_succeeded,
            last_outcome: self.ctx.counters.last_outcome.clone(),
            last_upload_age_ms: self
                .ctx
                .counters
                .last_outcome
                .as_ref()
                .map(|outcome| now_ms.saturating_sub(outcome.timestamp_ms)),
            next_upload_in_ms: self
                .ctx
                .scheduler
                .next_due_ms()
                .map(|due| due.saturating_sub(now_ms)),
            active_interval_ms: schedule.active_interval_ms,
            link_losses: self.ctx.connectivity.link_losses(),
            uptime_ms: now_ms.saturating_sub(self.ctx.booted_at_ms),
            build: self.ctx.build.as_str().to_string(),
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn state(&self) -> ConnectivityState {
        self.ctx.connectivity.state()
    }

    pub fn loop_idle_ms(&self) -> u64 {
        self.ctx.config.loop_idle_ms
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn transport_mut(&mut self) -> &mut H {
        &mut self.transport
    }

    pub fn store_mut(&mut self) -> &mut CredentialStore<S> {
        &mut self.store
    }

    fn schedule_restart(&mut self, reason: RestartReason, now_ms: u64) {
        let at_ms = now_ms.saturating_add(self.ctx.config.restart_grace_ms);
        info!("restart scheduled in {} ms ({reason:?})", self.ctx.config.restart_grace_ms);
        self.ctx.pending_restart = Some(PendingRestart { at_ms, reason });
    }
}

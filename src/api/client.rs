//! Typed client entrypoint
//!
//! Owns the credential store, the HTTPS backend and one MQTT session per
//! backend region. Every credentialed operation checks the refresh margin
//! first (single-flight behind the store); a successful refresh reconnects
//! the affected sessions and re-arms the one-shot timer that fires shortly
//! before the new expiry.

use crate::api::http::{biz_codes, HttpBackend, ReqwestBackend, SignedRequest};
use crate::api::model::{houses_from_body, rooms_from_body, stations_from_body};
use crate::api::model::{House, Room, Station};
use crate::auth::{Authenticator, CredentialBundle, CredentialStore};
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::events::{EventListener, SubscriptionKey};
use crate::protocol::status::DevicesStatus;
use crate::protocol::topics::{event_shadows, login_notice_topic};
use crate::protocol::{EventKind, ResponseEnvelope};
use crate::shadow::ShadowEngine;
use crate::transport::mqtt::{MqttEndpoint, MqttSession};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Client for the X-Sense cloud backend
pub struct XsenseClient {
    config: ClientConfig,
    store: Arc<CredentialStore>,
    http: Arc<dyn HttpBackend>,
    /// Base MQTT client id; each session appends a per-connection suffix
    client_id: String,
    sessions: Mutex<HashMap<String, Arc<MqttSession>>>,
    houses: RwLock<HashMap<String, House>>,
    /// Bundle the sessions were last connected with; a newer one from the
    /// store triggers their reconnect.
    active_bundle: RwLock<Option<Arc<CredentialBundle>>>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
    /// Self-reference handed to the refresh timer task; a dropped client
    /// must not be kept alive by its own timer.
    weak: Weak<XsenseClient>,
}

impl XsenseClient {
    pub fn new(
        config: ClientConfig,
        authenticator: Arc<dyn Authenticator>,
        http: Arc<dyn HttpBackend>,
    ) -> Arc<Self> {
        let store = Arc::new(CredentialStore::new(
            authenticator,
            config.auth.refresh_safety_margin(),
        ));

        Arc::new_cyclic(|weak| Self {
            store,
            http,
            client_id: format!("xsense-{}", Uuid::new_v4()),
            sessions: Mutex::new(HashMap::new()),
            houses: RwLock::new(HashMap::new()),
            active_bundle: RwLock::new(None),
            refresh_timer: Mutex::new(None),
            weak: weak.clone(),
            config,
        })
    }

    /// Production wiring: reqwest against the configured API host
    pub fn with_defaults(config: ClientConfig, authenticator: Arc<dyn Authenticator>) -> Arc<Self> {
        let http = Arc::new(ReqwestBackend::new(config.api.host.clone()));
        Self::new(config, authenticator, http)
    }

    /// Log in, load the account's houses and bring up one MQTT session per
    /// backend region. Broker connects proceed in the background; shadow
    /// operations issued before they settle wait on the connecting state.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<()> {
        let bundle = self.store.login(username, password).await?;
        *self.active_bundle.write().await = Some(bundle.clone());
        self.schedule_refresh_timer().await;

        let houses = self.get_houses().await?;
        info!(houses = houses.len(), "login complete, starting mqtt sessions");

        // get_houses may have refreshed an already-expiring grant
        let bundle = self
            .active_bundle
            .read()
            .await
            .clone()
            .unwrap_or(bundle);

        let mut sessions = self.sessions.lock().await;
        for house in &houses {
            let session = sessions
                .entry(house.mqtt_region.clone())
                .or_insert_with(|| {
                    MqttSession::new(
                        &self.client_id,
                        MqttEndpoint {
                            host: house.mqtt_server.clone(),
                            region: house.mqtt_region.clone(),
                        },
                        self.config.mqtt.clone(),
                    )
                })
                .clone();

            let bundle = bundle.as_ref().clone();
            tokio::spawn(async move {
                if let Err(e) = session.connect(bundle).await {
                    warn!("mqtt connect failed, will retry on first use: {e}");
                }
            });
        }

        Ok(())
    }

    /// Cancel the refresh timer, tear all sessions down and drop every
    /// credential. Safe to call repeatedly.
    pub async fn logout(&self) {
        if let Some(timer) = self.refresh_timer.lock().await.take() {
            timer.abort();
        }

        let sessions = std::mem::take(&mut *self.sessions.lock().await);
        for (region, session) in sessions {
            debug!(%region, "tearing down mqtt session");
            session.router().clear().await;
            session.registry().clear().await;
            session.disconnect().await;
        }

        self.houses.write().await.clear();
        *self.active_bundle.write().await = None;
        self.store.clear().await;
        info!("logged out");
    }

    /// Refresh-if-needed gate in front of every credentialed operation.
    ///
    /// A freshly installed bundle invalidates the sessions' read reference:
    /// they reconnect with the new one, and the expiry timer is re-armed.
    async fn credentialed(&self) -> ApiResult<Arc<CredentialBundle>> {
        let bundle = self.store.refresh_if_needed().await?;

        let replaced = {
            let active = self.active_bundle.read().await;
            !matches!(active.as_ref(), Some(active) if Arc::ptr_eq(active, &bundle))
        };
        if replaced {
            *self.active_bundle.write().await = Some(bundle.clone());
            self.schedule_refresh_timer().await;

            let sessions: Vec<Arc<MqttSession>> =
                self.sessions.lock().await.values().cloned().collect();
            for session in sessions {
                if let Err(e) = session.reconnect(bundle.as_ref().clone()).await {
                    warn!("session reconnect after refresh failed: {e}");
                }
            }
        }

        Ok(bundle)
    }

    /// One-shot timer that redoes the refresh shortly before expiry;
    /// cancelled on logout and replaced on every successful refresh.
    // Boxed with an explicit `Send` bound to break the `credentialed` ->
    // `schedule_refresh_timer` -> spawned-task -> `credentialed` auto-trait
    // inference cycle; the spawned task requires a `Send` future.
    fn schedule_refresh_timer(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(due) = self.store.refresh_due_at().await else {
                return;
            };

            let weak = self.weak.clone();
            let handle = tokio::spawn(async move {
                let delay = (due - Utc::now()).to_std().unwrap_or_default();
                debug!(delay_secs = delay.as_secs(), "refresh timer armed");
                tokio::time::sleep(delay).await;

                if let Some(client) = weak.upgrade() {
                    // drop our own handle so re-arming does not abort this task
                    let _ = client.refresh_timer.lock().await.take();
                    if let Err(e) = client.credentialed().await {
                        warn!("scheduled credential refresh failed: {e}");
                    }
                }
            });

            if let Some(previous) = self.refresh_timer.lock().await.replace(handle) {
                previous.abort();
            }
        })
    }

    /// POST one signed request and parse the uniform envelope
    async fn post_envelope(&self, request: SignedRequest) -> ApiResult<ResponseEnvelope> {
        let secret = self.config.api.client_secret.as_deref().unwrap_or("");
        let token = self
            .store
            .current()
            .await
            .map(|bundle| bundle.session_token.clone());

        let raw = self.http.post(request.sign(secret), token.as_deref()).await?;
        Ok(ResponseEnvelope::from_wire(&raw))
    }

    fn expect_success(envelope: ResponseEnvelope) -> ApiResult<Option<Value>> {
        if envelope.is_success() {
            Ok(envelope.body)
        } else {
            Err(ApiError::protocol(envelope.code, envelope.message))
        }
    }

    /// Fetch all houses of the account
    pub async fn get_houses(&self) -> ApiResult<Vec<House>> {
        self.credentialed().await?;

        let envelope = self
            .post_envelope(
                SignedRequest::new(&self.config.api, biz_codes::HOUSES)
                    .parameter("utctimestamp", 0),
            )
            .await?;
        let body = Self::expect_success(envelope)?.unwrap_or(Value::Null);

        let houses = houses_from_body(&body);
        let mut cache = self.houses.write().await;
        for house in &houses {
            cache.insert(house.house_id.clone(), house.clone());
        }
        Ok(houses)
    }

    /// Fetch the rooms of one house
    pub async fn get_rooms(&self, house_id: &str) -> ApiResult<Vec<Room>> {
        self.credentialed().await?;

        let envelope = self
            .post_envelope(
                SignedRequest::new(&self.config.api, biz_codes::ROOMS)
                    .parameter("houseId", house_id)
                    .parameter("utctimestamp", 0),
            )
            .await?;
        let body = Self::expect_success(envelope)?.unwrap_or(Value::Null);
        Ok(rooms_from_body(&body))
    }

    /// Fetch the devices of one house, enriched with the per-station
    /// `2nd_mainpage` shadow status. A station whose status fetch fails is
    /// returned without it.
    pub async fn get_devices(&self, house_id: &str) -> ApiResult<Vec<Station>> {
        self.credentialed().await?;

        let envelope = self
            .post_envelope(
                SignedRequest::new(&self.config.api, biz_codes::DEVICES)
                    .parameter("houseId", house_id)
                    .parameter("utctimestamp", 0),
            )
            .await?;
        let body = Self::expect_success(envelope)?.unwrap_or(Value::Null);
        let mut stations = stations_from_body(&body);

        for station in &mut stations {
            let reply = self
                .send_shadow_get(house_id, &station.thing_name(), "2nd_mainpage")
                .await;
            match reply {
                Ok(envelope) if envelope.is_success() => {
                    let status = DevicesStatus::from_body(&envelope.body.unwrap_or(Value::Null));
                    station.status = status.station;
                    for sensor_status in status.sensors {
                        if let Some(sensor) = station
                            .sensors
                            .iter_mut()
                            .find(|s| s.serial_number == sensor_status.serial_number)
                        {
                            sensor.status = Some(sensor_status);
                        }
                    }
                }
                Ok(envelope) => {
                    warn!(
                        station = %station.serial_number,
                        "status request failed {}: {}",
                        envelope.code,
                        envelope.message
                    );
                }
                Err(e) => {
                    warn!(station = %station.serial_number, "status request failed: {e}");
                }
            }
        }

        Ok(stations)
    }

    /// GET a named shadow of a thing in this house's region
    pub async fn send_shadow_get(
        &self,
        house_id: &str,
        thing_name: &str,
        shadow_name: &str,
    ) -> ApiResult<ResponseEnvelope> {
        self.credentialed().await?;
        let engine = self.engine_for(house_id).await?;
        engine.send_get(thing_name, shadow_name).await
    }

    /// UPDATE a named shadow of a thing in this house's region
    pub async fn send_shadow_update(
        &self,
        house_id: &str,
        thing_name: &str,
        shadow_name: &str,
        desired: Value,
    ) -> ApiResult<ResponseEnvelope> {
        self.credentialed().await?;
        let engine = self.engine_for(house_id).await?;
        engine.send_update(thing_name, shadow_name, desired).await
    }

    /// Trigger a sensor self test (fire-and-check; the result arrives as a
    /// self-test event).
    pub async fn do_self_test(
        &self,
        station: &Station,
        sensor_serial: &str,
        user_id: &str,
    ) -> ApiResult<bool> {
        let desired = json!({
            "shadow": "appSelfTest",
            "deviceSN": sensor_serial,
            "stationSN": station.serial_number,
            "time": Utc::now().timestamp_millis().to_string(),
            "userId": user_id,
        });
        let envelope = self
            .send_shadow_update(
                &station.house_id,
                &station.thing_name(),
                &format!("2nd_selftest_{sensor_serial}"),
                desired,
            )
            .await?;
        Ok(envelope.is_success())
    }

    /// Mute an alarming sensor
    pub async fn mute_sensor(
        &self,
        station: &Station,
        sensor_serial: &str,
        user_id: &str,
    ) -> ApiResult<bool> {
        let desired = json!({
            "shadow": "appMute",
            "deviceSN": sensor_serial,
            "stationSN": station.serial_number,
            "userId": user_id,
            "muteType": "0",
        });
        let envelope = self
            .send_shadow_update(
                &station.house_id,
                &station.thing_name(),
                "2nd_appmute",
                desired,
            )
            .await?;
        Ok(envelope.is_success())
    }

    /// Set the station's voice prompt volume
    pub async fn set_voice_prompt_volume(
        &self,
        station: &Station,
        volume: u8,
    ) -> ApiResult<bool> {
        let desired = json!({
            "shadow": "infoBase",
            "stationSN": station.serial_number,
            "voiceVol": volume.to_string(),
        });
        let envelope = self
            .send_shadow_update(
                &station.house_id,
                &station.thing_name(),
                &format!("2nd_cfg_{}", station.serial_number),
                desired,
            )
            .await?;
        Ok(envelope.is_success())
    }

    /// Listen for device events (alarm, mute, self test) of one thing
    pub async fn register_event_listener(
        &self,
        house_id: &str,
        thing_name: &str,
        kind: EventKind,
        listener: Arc<dyn EventListener>,
    ) -> ApiResult<()> {
        let session = self.session_for(house_id).await?;
        let event_shadow = match kind {
            EventKind::Alarm => event_shadows::ALARM,
            EventKind::Mute => event_shadows::MUTE,
            EventKind::SelfTest => event_shadows::SELF_TEST,
            EventKind::Logout => {
                return Err(ApiError::transport(
                    "logout notices are account-wide; use register_account_listener",
                ));
            }
        };

        let topic = session.topics().event_topic(thing_name, event_shadow);
        session
            .router()
            .register(SubscriptionKey::new(topic, kind), listener)
            .await
    }

    /// Listen for the account-wide forced-logout notice in one region
    pub async fn register_account_listener(
        &self,
        region: &str,
        user_id: &str,
        listener: Arc<dyn EventListener>,
    ) -> ApiResult<()> {
        let session = self
            .sessions
            .lock()
            .await
            .get(region)
            .cloned()
            .ok_or_else(|| ApiError::transport(format!("no mqtt session for region {region}")))?;

        session
            .router()
            .register(
                SubscriptionKey::new(login_notice_topic(user_id), EventKind::Logout),
                listener,
            )
            .await
    }

    /// Remove a listener from every region it is registered in
    pub async fn unregister_event_listener(&self, listener: &Arc<dyn EventListener>) {
        let sessions: Vec<Arc<MqttSession>> =
            self.sessions.lock().await.values().cloned().collect();
        for session in sessions {
            session.router().unregister(listener).await;
        }
    }

    async fn session_for(&self, house_id: &str) -> ApiResult<Arc<MqttSession>> {
        let region = {
            let houses = self.houses.read().await;
            houses
                .get(house_id)
                .map(|house| house.mqtt_region.clone())
                .ok_or_else(|| ApiError::transport(format!("unknown house {house_id}")))?
        };

        self.sessions
            .lock()
            .await
            .get(&region)
            .cloned()
            .ok_or_else(|| ApiError::transport(format!("no mqtt session for region {region}")))
    }

    async fn engine_for(&self, house_id: &str) -> ApiResult<ShadowEngine<MqttSession>> {
        let session = self.session_for(house_id).await?;
        Ok(ShadowEngine::new(
            session.clone(),
            session.topics().clone(),
            session.request_timeout(),
        ))
    }
}

impl Drop for XsenseClient {
    fn drop(&mut self) {
        // the timer task only holds a Weak, but there is no point letting
        // it sleep on after the client is gone
        if let Ok(mut guard) = self.refresh_timer.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

//! Linux location provider backed by the GeoClue2 D-Bus service.
//!
//! GeoClue has no per-application prompt API (access is mediated by the
//! desktop's agent when a client starts), so this provider emits no
//! authorization events; the two request methods only log. Each
//! `start_updates` call runs one fetch cycle on a worker thread and reports
//! the result as a single-fix batch or a `Failed` event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use futures_timer::Delay;
use log::debug;
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, Proxy};

use crate::provider::{LocationProvider, ProviderEvent, ProviderObserver};
use crate::{AuthorizationStatus, Coordinate, LocationError, LocationResult};

const GEOCLUE_SERVICE: &str = "org.freedesktop.GeoClue2";
const MANAGER_PATH: &str = "/org/freedesktop/GeoClue2/Manager";
const MANAGER_IFACE: &str = "org.freedesktop.GeoClue2.Manager";
const CLIENT_IFACE: &str = "org.freedesktop.GeoClue2.Client";
const LOCATION_IFACE: &str = "org.freedesktop.GeoClue2.Location";
const DESKTOP_ID: &str = "pinpoint";

// GeoClue reports unknown altitude as -1.7e308.
const UNKNOWN_ALTITUDE_FLOOR: f64 = -1.0e308;

const FIX_POLL_ATTEMPTS: u32 = 40;
const FIX_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Provider backed by GeoClue2.
pub struct GeoClueProvider {
    observer: Mutex<Option<Arc<dyn ProviderObserver>>>,
    distance_filter: Mutex<f64>,
    cached_fix: Arc<Mutex<Option<Coordinate>>>,
    status: Arc<Mutex<AuthorizationStatus>>,
    // Bumped by `stop_updates`; a fetch started under an older value
    // discards its result.
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for GeoClueProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoClueProvider").finish()
    }
}

impl GeoClueProvider {
    /// Creates an idle provider. Nothing talks to D-Bus until
    /// `start_updates`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observer: Mutex::new(None),
            distance_filter: Mutex::new(0.0),
            cached_fix: Arc::new(Mutex::new(None)),
            status: Arc::new(Mutex::new(AuthorizationStatus::NotDetermined)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for GeoClueProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationProvider for GeoClueProvider {
    fn set_observer(&self, observer: Arc<dyn ProviderObserver>) {
        *self.observer.lock().expect("observer mutex poisoned") = Some(observer);
    }

    fn set_distance_filter(&self, meters: f64) -> LocationResult<()> {
        *self
            .distance_filter
            .lock()
            .expect("distance filter mutex poisoned") = meters;
        Ok(())
    }

    fn start_updates(&self) -> LocationResult<()> {
        let observer = self
            .observer
            .lock()
            .expect("observer mutex poisoned")
            .clone()
            .ok_or(LocationError::ObserverMissing)?;
        let threshold = *self
            .distance_filter
            .lock()
            .expect("distance filter mutex poisoned");
        let cached = Arc::clone(&self.cached_fix);
        let status = Arc::clone(&self.status);
        let generation = Arc::clone(&self.generation);
        let started_under = generation.load(Ordering::Acquire);

        thread::Builder::new()
            .name("geoclue-fetch".into())
            .spawn(move || {
                let result = futures::executor::block_on(fetch_fix(threshold));
                if generation.load(Ordering::Acquire) != started_under {
                    debug!("discarding fix fetched after stop");
                    return;
                }
                match result {
                    Ok(fix) => {
                        *status.lock().expect("status mutex poisoned") =
                            AuthorizationStatus::AuthorizedAlways;
                        *cached.lock().expect("cached fix mutex poisoned") = Some(fix.clone());
                        observer.on_event(ProviderEvent::FixBatch { fixes: vec![fix] });
                    }
                    Err(error) => {
                        if error == LocationError::PermissionDenied {
                            *status.lock().expect("status mutex poisoned") =
                                AuthorizationStatus::Denied;
                        }
                        observer.on_event(ProviderEvent::Failed { error });
                    }
                }
            })
            .map_err(|err| LocationError::Platform {
                message: format!("failed to spawn fetch thread: {err}"),
            })?;

        Ok(())
    }

    fn stop_updates(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn request_when_in_use_authorization(&self) -> LocationResult<()> {
        debug!("GeoClue mediates access at client start; no prompt to request");
        Ok(())
    }

    fn request_always_authorization(&self) -> LocationResult<()> {
        debug!("GeoClue mediates access at client start; no prompt to request");
        Ok(())
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.lock().expect("status mutex poisoned")
    }

    fn last_known_coordinate(&self) -> Option<Coordinate> {
        self.cached_fix
            .lock()
            .expect("cached fix mutex poisoned")
            .clone()
    }
}

async fn fetch_fix(distance_threshold: f64) -> LocationResult<Coordinate> {
    let connection = Connection::system()
        .await
        .map_err(|err| platform_error("D-Bus connection failed", &err))?;

    let manager = Proxy::new(&connection, GEOCLUE_SERVICE, MANAGER_PATH, MANAGER_IFACE)
        .await
        .map_err(|err| platform_error("GeoClue2 not available", &err))?;
    let client_path: OwnedObjectPath = manager
        .call("GetClient", &())
        .await
        .map_err(|err| platform_error("GetClient failed", &err))?;

    let client = Proxy::new(
        &connection,
        GEOCLUE_SERVICE,
        client_path.as_str(),
        CLIENT_IFACE,
    )
    .await
    .map_err(|err| platform_error("client proxy failed", &err))?;

    client
        .set_property("DesktopId", DESKTOP_ID)
        .await
        .map_err(|err| platform_error("failed to set desktop ID", &err.into()))?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let threshold = distance_threshold.max(0.0) as u32;
    client
        .set_property("DistanceThreshold", threshold)
        .await
        .map_err(|err| platform_error("failed to set distance threshold", &err.into()))?;

    client.call::<_, _, ()>("Start", &()).await.map_err(|err| {
        if err.to_string().contains("AccessDenied") {
            LocationError::PermissionDenied
        } else {
            platform_error("failed to start GeoClue client", &err)
        }
    })?;

    let fix = wait_for_fix(&connection, &client).await;

    let _ = client.call::<_, _, ()>("Stop", &()).await;

    fix
}

// The Location property stays at "/" until GeoClue has a fix.
async fn wait_for_fix(connection: &Connection, client: &Proxy<'_>) -> LocationResult<Coordinate> {
    for _ in 0..FIX_POLL_ATTEMPTS {
        let location_path: OwnedObjectPath = client
            .get_property("Location")
            .await
            .map_err(|err| platform_error("failed to read location path", &err.into()))?;

        if location_path.as_str() != "/" {
            return read_location(connection, &location_path).await;
        }

        Delay::new(FIX_POLL_INTERVAL).await;
    }

    Err(LocationError::FixUnavailable)
}

async fn read_location(
    connection: &Connection,
    location_path: &OwnedObjectPath,
) -> LocationResult<Coordinate> {
    let location = Proxy::new(
        connection,
        GEOCLUE_SERVICE,
        location_path.as_str(),
        LOCATION_IFACE,
    )
    .await
    .map_err(|err| platform_error("location proxy failed", &err))?;

    let latitude: f64 = location
        .get_property("Latitude")
        .await
        .map_err(|err| platform_error("failed to read latitude", &err.into()))?;
    let longitude: f64 = location
        .get_property("Longitude")
        .await
        .map_err(|err| platform_error("failed to read longitude", &err.into()))?;
    let altitude = location
        .get_property::<f64>("Altitude")
        .await
        .ok()
        .filter(|altitude| *altitude > UNKNOWN_ALTITUDE_FLOOR);
    let accuracy = location.get_property::<f64>("Accuracy").await.ok();

    Ok(Coordinate {
        latitude,
        longitude,
        altitude,
        horizontal_accuracy: accuracy,
        vertical_accuracy: None,
        timestamp: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0),
    })
}

fn platform_error(context: &str, err: &zbus::Error) -> LocationError {
    LocationError::Platform {
        message: format!("{context}: {err}"),
    }
}

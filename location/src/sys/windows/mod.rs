//! Windows provider backed by the WinRT `Geolocator`.
//!
//! `MovementThreshold` carries the distance filter and `PositionChanged`
//! delivers fixes. `RequestAccessAsync` doubles as the permission prompt;
//! Windows does not distinguish foreground from background grants, so an
//! "always" request reports the same grant at the stronger level.

use std::sync::{Arc, Mutex};
use std::thread;

use log::error;
use windows::core::Ref;
use windows::Devices::Geolocation::{
    GeolocationAccessStatus, Geolocator, PositionChangedEventArgs,
};
use windows::Foundation::TypedEventHandler;

use crate::provider::{LocationProvider, ProviderEvent, ProviderObserver};
use crate::{AuthorizationStatus, Coordinate, LocationError, LocationResult};

/// Provider backed by the WinRT `Geolocator`.
#[derive(Default)]
pub struct WindowsLocationProvider {
    geolocator: Mutex<Option<Geolocator>>,
    observer: Mutex<Option<Arc<dyn ProviderObserver>>>,
    position_token: Mutex<Option<i64>>,
    distance_filter: Mutex<Option<f64>>,
    cached_fix: Arc<Mutex<Option<Coordinate>>>,
    status: Arc<Mutex<AuthorizationStatus>>,
}

impl std::fmt::Debug for WindowsLocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsLocationProvider").finish()
    }
}

impl WindowsLocationProvider {
    /// Creates an idle provider. The `Geolocator` is built on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_geolocator(&self) -> LocationResult<Geolocator> {
        let mut guard = self.geolocator.lock().expect("geolocator mutex poisoned");
        if let Some(geolocator) = guard.as_ref() {
            return Ok(geolocator.clone());
        }

        let geolocator = Geolocator::new().map_err(map_win_error)?;
        let filter = *self
            .distance_filter
            .lock()
            .expect("distance filter mutex poisoned");
        if let Some(meters) = filter {
            geolocator
                .SetMovementThreshold(meters)
                .map_err(map_win_error)?;
        }
        *guard = Some(geolocator.clone());
        Ok(geolocator)
    }

    fn request_access(&self, granted_status: AuthorizationStatus) -> LocationResult<()> {
        let observer = self
            .observer
            .lock()
            .expect("observer mutex poisoned")
            .clone()
            .ok_or(LocationError::ObserverMissing)?;
        let status_slot = Arc::clone(&self.status);

        thread::Builder::new()
            .name("geolocator-access".into())
            .spawn(move || {
                let status = match request_access_blocking() {
                    Ok(GeolocationAccessStatus::Allowed) => granted_status,
                    Ok(GeolocationAccessStatus::Denied) => AuthorizationStatus::Denied,
                    Ok(_) => AuthorizationStatus::Unknown,
                    Err(err) => {
                        observer.on_event(ProviderEvent::Failed { error: err });
                        return;
                    }
                };
                *status_slot.lock().expect("status mutex poisoned") = status;
                observer.on_event(ProviderEvent::AuthorizationChanged { status });
            })
            .map_err(|err| LocationError::Platform {
                message: format!("failed to spawn access thread: {err}"),
            })?;

        Ok(())
    }
}

impl LocationProvider for WindowsLocationProvider {
    fn set_observer(&self, observer: Arc<dyn ProviderObserver>) {
        *self.observer.lock().expect("observer mutex poisoned") = Some(observer);
    }

    fn set_distance_filter(&self, meters: f64) -> LocationResult<()> {
        *self
            .distance_filter
            .lock()
            .expect("distance filter mutex poisoned") = Some(meters);

        let guard = self.geolocator.lock().expect("geolocator mutex poisoned");
        if let Some(geolocator) = guard.as_ref() {
            geolocator
                .SetMovementThreshold(meters)
                .map_err(map_win_error)?;
        }
        Ok(())
    }

    fn start_updates(&self) -> LocationResult<()> {
        let observer = self
            .observer
            .lock()
            .expect("observer mutex poisoned")
            .clone()
            .ok_or(LocationError::ObserverMissing)?;

        let mut token_guard = self.position_token.lock().expect("token mutex poisoned");
        if token_guard.is_some() {
            // Already producing updates.
            return Ok(());
        }

        let geolocator = self.ensure_geolocator()?;
        let cache = Arc::clone(&self.cached_fix);
        let handler = TypedEventHandler::new(
            move |_sender: Ref<'_, Geolocator>, args: Ref<'_, PositionChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    match coordinate_from_args(args) {
                        Ok(fix) => {
                            *cache.lock().expect("cached fix mutex poisoned") = Some(fix.clone());
                            observer.on_event(ProviderEvent::FixBatch { fixes: vec![fix] });
                        }
                        Err(error) => observer.on_event(ProviderEvent::Failed { error }),
                    }
                }
                Ok(())
            },
        );

        let token = geolocator.PositionChanged(&handler).map_err(map_win_error)?;
        *token_guard = Some(token);
        Ok(())
    }

    fn stop_updates(&self) {
        let token = self.position_token.lock().expect("token mutex poisoned").take();
        if let Some(token) = token {
            let guard = self.geolocator.lock().expect("geolocator mutex poisoned");
            if let Some(geolocator) = guard.as_ref() {
                if let Err(err) = geolocator.RemovePositionChanged(token) {
                    error!("failed to stop position updates: {}", err.message());
                }
            }
        }
    }

    fn request_when_in_use_authorization(&self) -> LocationResult<()> {
        self.request_access(AuthorizationStatus::AuthorizedWhenInUse)
    }

    fn request_always_authorization(&self) -> LocationResult<()> {
        self.request_access(AuthorizationStatus::AuthorizedAlways)
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

fn request_access_blocking() -> LocationResult<GeolocationAccessStatus> {
    Geolocator::RequestAccessAsync()
        .map_err(map_win_error)?
        .get()
        .map_err(map_win_error)
}

fn coordinate_from_args(args: &PositionChangedEventArgs) -> LocationResult<Coordinate> {
    let coordinate = args
        .Position()
        .map_err(map_win_error)?
        .Coordinate()
        .map_err(map_win_error)?;
    let point = coordinate.Point().map_err(map_win_error)?;
    let position = point.Position().map_err(map_win_error)?;

    #[allow(clippy::cast_sign_loss)]
    let timestamp = coordinate
        .Timestamp()
        .map_err(map_win_error)?
        .UniversalTime as u64;

    let accuracy = coordinate.Accuracy().ok();
    let vertical_accuracy = coordinate
        .AltitudeAccuracy()
        .ok()
        .and_then(|reference| reference.Value().ok());

    Ok(Coordinate {
        latitude: position.Latitude,
        longitude: position.Longitude,
        altitude: Some(position.Altitude),
        horizontal_accuracy: accuracy,
        vertical_accuracy,
        timestamp,
    })
}

fn map_win_error(err: windows::core::Error) -> LocationError {
    LocationError::Platform {
        message: err.message().to_string(),
    }
}

//! Apple platform (iOS/macOS) provider bridging `CoreLocation` via
//! swift-bridge. The Swift side lives in `CoreLocationBridge.swift` and
//! relays delegate callbacks to Rust as JSON-encoded [`ProviderEvent`]s.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::error;
use serde::de::DeserializeOwned;

use crate::provider::{LocationProvider, ProviderEvent, ProviderObserver};
use crate::{AuthorizationStatus, Coordinate, LocationError, LocationResult};

#[swift_bridge::bridge]
mod ffi {
    extern "Rust" {
        type BridgeRelay;

        fn dispatch_event(self: &BridgeRelay, json_event: &str);
    }

    extern "Swift" {
        type CoreLocationBridge;

        #[swift_bridge(init)]
        fn new(relay: BridgeRelay) -> CoreLocationBridge;

        fn set_distance_filter(self: &CoreLocationBridge, meters: f64);
        fn start_updates(self: &CoreLocationBridge);
        fn stop_updates(self: &CoreLocationBridge);
        fn request_when_in_use_authorization(self: &CoreLocationBridge);
        fn request_always_authorization(self: &CoreLocationBridge);
        fn authorization_status(self: &CoreLocationBridge) -> i32;
    }
}

/// Provider backed by the `CoreLocation` stack via swift-bridge.
#[derive(Default)]
pub struct AppleLocationProvider {
    bridge: Mutex<Option<ffi::CoreLocationBridge>>,
    observer: Mutex<Option<Arc<dyn ProviderObserver>>>,
    distance_filter: Mutex<Option<f64>>,
    cached_fix: Arc<Mutex<Option<Coordinate>>>,
}

// Safety: CoreLocationBridge is protected by a Mutex and only accessed from
// the main thread. The raw pointer it contains is managed by the Swift side
// and synchronized appropriately.
#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl Send for AppleLocationProvider {}
unsafe impl Sync for AppleLocationProvider {}

impl fmt::Debug for AppleLocationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppleLocationProvider").finish()
    }
}

impl AppleLocationProvider {
    /// Constructs a provider without an observer. The Swift bridge object is
    /// created when the observer is registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bridge<F>(&self, action: F) -> LocationResult<()>
    where
        F: FnOnce(&ffi::CoreLocationBridge),
    {
        let guard = self.bridge.lock().expect("bridge mutex poisoned");
        guard.as_ref().map_or(Err(LocationError::ObserverMissing), |bridge| {
            action(bridge);
            Ok(())
        })
    }

    fn restore_state(&self) {
        let filter = *self
            .distance_filter
            .lock()
            .expect("distance filter mutex poisoned");
        if let Some(meters) = filter {
            if let Err(err) = self.with_bridge(|bridge| bridge.set_distance_filter(meters)) {
                error!("failed to restore distance filter: {err}");
            }
        }
    }
}

impl LocationProvider for AppleLocationProvider {
    fn set_observer(&self, observer: Arc<dyn ProviderObserver>) {
        {
            let mut guard = self.observer.lock().expect("observer mutex poisoned");
            *guard = Some(observer.clone());
        }

        let relay = BridgeRelay::new(observer, Arc::clone(&self.cached_fix));
        let bridge = ffi::CoreLocationBridge::new(relay);

        {
            let mut guard = self.bridge.lock().expect("bridge mutex poisoned");
            *guard = Some(bridge);
        }

        self.restore_state();
    }

    fn set_distance_filter(&self, meters: f64) -> LocationResult<()> {
        {
            let mut guard = self
                .distance_filter
                .lock()
                .expect("distance filter mutex poisoned");
            *guard = Some(meters);
        }

        // Filter changes before observer registration are applied when the
        // bridge is created.
        if self.bridge.lock().expect("bridge mutex poisoned").is_none() {
            return Ok(());
        }
        self.with_bridge(|bridge| bridge.set_distance_filter(meters))
    }

    fn start_updates(&self) -> LocationResult<()> {
        self.with_bridge(|bridge| bridge.start_updates())
    }

    fn stop_updates(&self) {
        if let Err(err) = self.with_bridge(|bridge| bridge.stop_updates()) {
            error!("failed to stop updates: {err}");
        }
    }

    fn request_when_in_use_authorization(&self) -> LocationResult<()> {
        self.with_bridge(|bridge| bridge.request_when_in_use_authorization())
    }

    fn request_always_authorization(&self) -> LocationResult<()> {
        self.with_bridge(|bridge| bridge.request_always_authorization())
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        let guard = self.bridge.lock().expect("bridge mutex poisoned");
        guard.as_ref().map_or(AuthorizationStatus::NotDetermined, |bridge| {
            AuthorizationStatus::from_raw(bridge.authorization_status())
        })
    }

    fn last_known_coordinate(&self) -> Option<Coordinate> {
        self.cached_fix
            .lock()
            .expect("cached fix mutex poisoned")
            .clone()
    }
}

/// Relay handed to Swift; decodes JSON events and forwards them to the
/// registered observer, caching the newest fix on the way through.
pub struct BridgeRelay {
    observer: Arc<dyn ProviderObserver>,
    cached_fix: Arc<Mutex<Option<Coordinate>>>,
}

impl BridgeRelay {
    fn new(observer: Arc<dyn ProviderObserver>, cached_fix: Arc<Mutex<Option<Coordinate>>>) -> Self {
        Self {
            observer,
            cached_fix,
        }
    }

    fn dispatch_event(&self, json_event: &str) {
        match from_json::<ProviderEvent>(json_event) {
            Ok(event) => {
                if let ProviderEvent::FixBatch { fixes } = &event {
                    if let Some(newest) = fixes.last() {
                        *self.cached_fix.lock().expect("cached fix mutex poisoned") =
                            Some(newest.clone());
                    }
                }
                self.observer.on_event(event);
            }
            Err(err) => {
                let error = LocationError::Serialization {
                    message: err.to_string(),
                };
                self.observer.on_event(ProviderEvent::Failed { error });
            }
        }
    }
}

impl fmt::Debug for BridgeRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeRelay").finish()
    }
}

fn from_json<T: DeserializeOwned>(value: &str) -> LocationResult<T> {
    serde_json::from_str(value).map_err(|err| LocationError::Serialization {
        message: err.to_string(),
    })
}

//! Platform-specific location providers.

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub mod apple;

/// Android provider. Constructed explicitly by the host (it wraps a JVM
/// bridge object), then injected via
/// [`LocationFacade::with_provider`](crate::LocationFacade::with_provider).
#[cfg(target_os = "android")]
pub mod android;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "linux")]
pub mod linux;

use std::sync::Arc;

use crate::provider::{LocationProvider, ProviderObserver};
use crate::{AuthorizationStatus, Coordinate, LocationError, LocationResult};

/// Returns the default provider for the current platform.
///
/// Targets without a self-constructible provider (Android, plus anything
/// this crate has no bindings for) get a provider whose operations fail
/// with [`LocationError::ServiceDisabled`].
#[must_use]
pub fn platform_provider() -> Arc<dyn LocationProvider> {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "ios", target_os = "macos"))] {
            Arc::new(apple::AppleLocationProvider::new())
        } else if #[cfg(target_os = "windows")] {
            Arc::new(windows::WindowsLocationProvider::new())
        } else if #[cfg(target_os = "linux")] {
            Arc::new(linux::GeoClueProvider::new())
        } else {
            Arc::new(UnsupportedProvider)
        }
    }
}

/// Provider for platforms without native bindings. Every operation that
/// would touch a platform stack fails with
/// [`LocationError::ServiceDisabled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedProvider;

impl LocationProvider for UnsupportedProvider {
    fn set_observer(&self, _observer: Arc<dyn ProviderObserver>) {}

    fn set_distance_filter(&self, _meters: f64) -> LocationResult<()> {
        Ok(())
    }

    fn start_updates(&self) -> LocationResult<()> {
        Err(LocationError::ServiceDisabled)
    }

    fn stop_updates(&self) {}

    fn request_when_in_use_authorization(&self) -> LocationResult<()> {
        Err(LocationError::ServiceDisabled)
    }

    fn request_always_authorization(&self) -> LocationResult<()> {
        Err(LocationError::ServiceDisabled)
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        AuthorizationStatus::NotDetermined
    }

    fn last_known_coordinate(&self) -> Option<Coordinate> {
        None
    }
}

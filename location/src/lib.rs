//! Callback-driven facade over native platform location services.
//!
//! This crate wraps the operating system's location stack (CoreLocation,
//! Android's `LocationManager`, WinRT `Geolocator`, GeoClue2) behind a small
//! facade: request the user's current position, observe authorization
//! transitions, and throttle update frequency with a distance filter.
//!
//! ```no_run
//! use pinpoint_location::LocationFacade;
//!
//! let facade = LocationFacade::new();
//! facade.set_on_authorization_error(|status| {
//!     eprintln!("location not authorized: {status:?}");
//! });
//! facade.request_location_update();
//! ```
//!
//! Results arrive asynchronously through the configured callbacks and the
//! optional update delegate; see [`LocationFacade`] for the full surface.

#![warn(missing_docs)]

mod facade;
mod provider;

/// Platform-specific provider implementations.
pub mod sys;

pub use facade::{LocationFacade, LocationUpdateDelegate, DEFAULT_DISTANCE_FILTER};
pub use provider::{LocationProvider, ProviderEvent, ProviderObserver};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for provider operations.
pub type LocationResult<T> = Result<T, LocationError>;

/// A single reported position sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
    /// Altitude in meters above sea level, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_accuracy: Option<f64>,
    /// Vertical accuracy in meters, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_accuracy: Option<f64>,
    /// Timestamp as Unix epoch milliseconds.
    pub timestamp: u64,
}

/// The platform's current permission grant level for location access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    /// The user has not yet been asked.
    #[default]
    NotDetermined,
    /// Location access is blocked by device policy (e.g. parental controls).
    Restricted,
    /// The user refused location access.
    Denied,
    /// Location access is granted in foreground and background.
    AuthorizedAlways,
    /// Location access is granted while the app is in use.
    AuthorizedWhenInUse,
    /// A grant level this crate does not recognize.
    Unknown,
}

impl AuthorizationStatus {
    /// Maps a raw platform status code to a status value.
    ///
    /// Codes outside the range the platform documented at the time this
    /// crate was written map to [`Self::Unknown`].
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::NotDetermined,
            1 => Self::Restricted,
            2 => Self::Denied,
            3 => Self::AuthorizedAlways,
            4 => Self::AuthorizedWhenInUse,
            _ => Self::Unknown,
        }
    }
}

// Bridge payloads from a newer OS release may carry grant names this crate
// has never heard of; those must land on `Unknown` rather than fail the
// whole event.
impl<'de> Deserialize<'de> for AuthorizationStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(match name.as_str() {
            "notDetermined" => Self::NotDetermined,
            "restricted" => Self::Restricted,
            "denied" => Self::Denied,
            "authorizedAlways" => Self::AuthorizedAlways,
            "authorizedWhenInUse" => Self::AuthorizedWhenInUse,
            _ => Self::Unknown,
        })
    }
}

/// Errors reported while acquiring a location fix.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LocationError {
    /// Location permission was not granted.
    #[error("location permission denied")]
    PermissionDenied,
    /// Location services are disabled on the device.
    #[error("location services disabled")]
    ServiceDisabled,
    /// The platform could not produce a fix right now.
    #[error("no location fix available")]
    FixUnavailable,
    /// An error reported by the underlying platform stack.
    #[error("platform error: {message}")]
    Platform {
        /// Platform-supplied description.
        message: String,
    },
    /// A bridge payload could not be encoded or decoded.
    #[error("malformed bridge payload: {message}")]
    Serialization {
        /// Decoder/encoder description.
        message: String,
    },
    /// The provider was driven before an observer was registered.
    #[error("no observer registered")]
    ObserverMissing,
}

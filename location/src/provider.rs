use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{AuthorizationStatus, Coordinate, LocationError, LocationResult};

/// Capability surface of a platform location service.
///
/// Implementations wrap the native stack for one platform (see [`crate::sys`]);
/// tests inject synchronous stubs through
/// [`LocationFacade::with_provider`](crate::LocationFacade::with_provider).
pub trait LocationProvider: Send + Sync {
    /// Registers the observer that receives provider events, replacing any
    /// previous one. Events emitted before an observer is registered are lost.
    fn set_observer(&self, observer: Arc<dyn ProviderObserver>);

    /// Sets the minimum movement, in meters, the platform must detect before
    /// emitting a new fix.
    fn set_distance_filter(&self, meters: f64) -> LocationResult<()>;

    /// Instructs the platform to begin producing fixes.
    fn start_updates(&self) -> LocationResult<()>;

    /// Instructs the platform to stop producing fixes. Best-effort: a fix
    /// already in flight may still be delivered.
    fn stop_updates(&self);

    /// Asks the platform for foreground ("while in use") authorization.
    /// May surface the system permission prompt.
    fn request_when_in_use_authorization(&self) -> LocationResult<()>;

    /// Asks the platform for background ("always") authorization.
    /// May surface the system permission prompt.
    fn request_always_authorization(&self) -> LocationResult<()>;

    /// The authorization status as the platform currently reports it.
    fn authorization_status(&self) -> AuthorizationStatus;

    /// The provider's cached most recent fix, if any.
    fn last_known_coordinate(&self) -> Option<Coordinate>;
}

/// Receives events emitted by a [`LocationProvider`].
pub trait ProviderObserver: Send + Sync {
    /// Called by the provider for every event, on whatever thread the
    /// platform delivers events on.
    fn on_event(&self, event: ProviderEvent);
}

/// An event produced by a platform location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProviderEvent {
    /// One or more fixes, oldest first.
    FixBatch {
        /// The reported fixes, in platform delivery order.
        fixes: Vec<Coordinate>,
    },
    /// The platform failed to produce a fix.
    Failed {
        /// The platform's error, forwarded verbatim.
        error: LocationError,
    },
    /// The platform's authorization grant changed.
    AuthorizationChanged {
        /// The newly reported status.
        status: AuthorizationStatus,
    },
}

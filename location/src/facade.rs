use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};

use crate::provider::{LocationProvider, ProviderEvent, ProviderObserver};
use crate::{sys, AuthorizationStatus, Coordinate, LocationError};

/// Default minimum movement, in meters, before a new fix is emitted.
pub const DEFAULT_DISTANCE_FILTER: f64 = 100.0;

type AuthorizationErrorHandler = Arc<dyn Fn(AuthorizationStatus) + Send + Sync>;
type AcquisitionErrorHandler = Arc<dyn Fn(&LocationError) + Send + Sync>;

/// Receives position updates from a [`LocationFacade`].
///
/// The facade holds the delegate weakly: registering it does not extend its
/// lifetime, and the owning application is responsible for keeping it alive
/// for as long as updates are wanted.
pub trait LocationUpdateDelegate: Send + Sync {
    /// Called with the newest fix of every delivered batch.
    fn on_location_update(&self, facade: &LocationFacade, coordinate: Coordinate);
}

/// Facade over a platform location provider.
///
/// Owns one [`LocationProvider`], tracks a local copy of the platform's
/// authorization status, and relays provider events to two optional callbacks
/// and one optional update delegate. Cloning is cheap and all clones share
/// the same provider and state.
#[derive(Clone)]
pub struct LocationFacade {
    inner: Arc<FacadeInner>,
}

struct FacadeInner {
    provider: Arc<dyn LocationProvider>,
    state: Mutex<FacadeState>,
}

struct FacadeState {
    distance_filter: f64,
    stop_after_first_fix: bool,
    authorization: AuthorizationStatus,
    on_authorization_error: Option<AuthorizationErrorHandler>,
    on_error: Option<AcquisitionErrorHandler>,
    update_delegate: Option<Weak<dyn LocationUpdateDelegate>>,
}

impl FacadeState {
    const fn new() -> Self {
        Self {
            distance_filter: DEFAULT_DISTANCE_FILTER,
            stop_after_first_fix: true,
            authorization: AuthorizationStatus::NotDetermined,
            on_authorization_error: None,
            on_error: None,
            update_delegate: None,
        }
    }
}

impl LocationFacade {
    /// Creates a facade over the current platform's default provider.
    #[must_use]
    pub fn new() -> Self {
        Self::with_provider(sys::platform_provider())
    }

    /// Creates a facade over an injected provider.
    ///
    /// Used by tests and by hosts that construct their own provider (the
    /// Android provider wraps a JVM bridge object and cannot be built
    /// without one).
    #[must_use]
    pub fn with_provider(provider: Arc<dyn LocationProvider>) -> Self {
        let inner = Arc::new(FacadeInner {
            provider,
            state: Mutex::new(FacadeState::new()),
        });

        if let Err(err) = inner.provider.set_distance_filter(DEFAULT_DISTANCE_FILTER) {
            warn!("failed to apply initial distance filter: {err}");
        }
        inner.provider.set_observer(Arc::new(FacadeObserver {
            inner: Arc::downgrade(&inner),
        }));

        Self { inner }
    }

    /// Asks the platform for the user's current position.
    ///
    /// If authorization is already known to be denied, reports it through the
    /// authorization-error callback without touching the provider. Otherwise
    /// starts updates; the result arrives asynchronously through the update
    /// delegate or the error callback. Safe to call repeatedly.
    pub fn request_location_update(&self) {
        let (status, handler) = {
            let state = self.inner.lock_state();
            (state.authorization, state.on_authorization_error.clone())
        };

        if status == AuthorizationStatus::Denied {
            debug!("location update refused: authorization denied");
            if let Some(handler) = handler {
                handler(AuthorizationStatus::Denied);
            }
            return;
        }

        if let Err(err) = self.inner.provider.start_updates() {
            self.inner.report_acquisition_error(&err);
        }
    }

    /// The configured distance filter, in meters.
    #[must_use]
    pub fn distance_filter(&self) -> f64 {
        self.inner.lock_state().distance_filter
    }

    /// Sets the distance filter and pushes it into the provider immediately,
    /// so subsequent updates honor the new threshold.
    pub fn set_distance_filter(&self, meters: f64) {
        self.inner.lock_state().distance_filter = meters;
        if let Err(err) = self.inner.provider.set_distance_filter(meters) {
            self.inner.report_acquisition_error(&err);
        }
    }

    /// Whether the provider is stopped after the first delivered fix.
    #[must_use]
    pub fn stop_after_first_fix(&self) -> bool {
        self.inner.lock_state().stop_after_first_fix
    }

    /// Controls whether the provider is stopped after the first delivered
    /// fix. Defaults to `true`.
    pub fn set_stop_after_first_fix(&self, stop: bool) {
        self.inner.lock_state().stop_after_first_fix = stop;
    }

    /// The facade's last-observed copy of the platform's authorization
    /// status. May transiently lag the platform between notification and
    /// handler execution.
    #[must_use]
    pub fn authorization_status(&self) -> AuthorizationStatus {
        self.inner.lock_state().authorization
    }

    /// The provider's cached most recent fix, if any.
    #[must_use]
    pub fn last_known_coordinate(&self) -> Option<Coordinate> {
        self.inner.provider.last_known_coordinate()
    }

    /// Sets the callback invoked whenever authorization resolves to
    /// [`Restricted`](AuthorizationStatus::Restricted),
    /// [`Denied`](AuthorizationStatus::Denied), or
    /// [`Unknown`](AuthorizationStatus::Unknown).
    pub fn set_on_authorization_error(
        &self,
        handler: impl Fn(AuthorizationStatus) + Send + Sync + 'static,
    ) {
        self.inner.lock_state().on_authorization_error = Some(Arc::new(handler));
    }

    /// Sets the callback invoked whenever the platform reports a
    /// location-acquisition error. Without one, errors are logged and
    /// dropped.
    pub fn set_on_error(&self, handler: impl Fn(&LocationError) + Send + Sync + 'static) {
        self.inner.lock_state().on_error = Some(Arc::new(handler));
    }

    /// Registers the update delegate. The facade keeps only a weak
    /// reference; see [`LocationUpdateDelegate`].
    pub fn set_update_delegate(&self, delegate: &Arc<dyn LocationUpdateDelegate>) {
        self.inner.lock_state().update_delegate = Some(Arc::downgrade(delegate));
    }

    /// Removes the update delegate.
    pub fn clear_update_delegate(&self) {
        self.inner.lock_state().update_delegate = None;
    }

    fn handle_authorization_change(inner: &Arc<FacadeInner>, status: AuthorizationStatus) {
        debug!("authorization changed to {status:?}");

        let handler = {
            let mut state = inner.lock_state();
            state.authorization = status;
            state.on_authorization_error.clone()
        };

        match status {
            AuthorizationStatus::NotDetermined => {
                if let Err(err) = inner.provider.request_when_in_use_authorization() {
                    inner.report_acquisition_error(&err);
                }
            }
            AuthorizationStatus::AuthorizedAlways => {
                if let Err(err) = inner.provider.start_updates() {
                    inner.report_acquisition_error(&err);
                }
            }
            AuthorizationStatus::AuthorizedWhenInUse => {
                if let Err(err) = inner.provider.start_updates() {
                    inner.report_acquisition_error(&err);
                }
                // Escalate to background authorization on every foreground
                // grant; recorded as an open product question in DESIGN.md.
                if let Err(err) = inner.provider.request_always_authorization() {
                    inner.report_acquisition_error(&err);
                }
            }
            AuthorizationStatus::Restricted
            | AuthorizationStatus::Denied
            | AuthorizationStatus::Unknown => {
                if let Some(handler) = handler {
                    handler(status);
                }
            }
        }
    }

    fn handle_fix_batch(inner: &Arc<FacadeInner>, fixes: Vec<Coordinate>) {
        // Batches arrive oldest-first; the last element is the newest fix.
        let Some(newest) = fixes.last().cloned() else {
            debug!("ignoring empty fix batch");
            return;
        };

        let (stop_after_first_fix, delegate) = {
            let state = inner.lock_state();
            (state.stop_after_first_fix, state.update_delegate.clone())
        };

        if stop_after_first_fix {
            inner.provider.stop_updates();
        }

        debug!(
            "fix received: lat {:.6} lon {:.6} ({} in batch)",
            newest.latitude,
            newest.longitude,
            fixes.len()
        );

        if let Some(delegate) = delegate.and_then(|weak| weak.upgrade()) {
            let facade = Self {
                inner: Arc::clone(inner),
            };
            delegate.on_location_update(&facade, newest);
        }
    }
}

impl Default for LocationFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocationFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("LocationFacade")
            .field("distance_filter", &state.distance_filter)
            .field("stop_after_first_fix", &state.stop_after_first_fix)
            .field("authorization", &state.authorization)
            .finish_non_exhaustive()
    }
}

impl FacadeInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, FacadeState> {
        self.state.lock().expect("facade state mutex poisoned")
    }

    // Never called with the state mutex held: the handler may re-enter the
    // facade.
    fn report_acquisition_error(&self, error: &LocationError) {
        warn!("location acquisition failed: {error}");
        let handler = self.lock_state().on_error.clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }
}

/// Forwards provider events into the facade. Holds the facade weakly so a
/// late platform event after the facade is dropped is ignored.
struct FacadeObserver {
    inner: Weak<FacadeInner>,
}

impl ProviderObserver for FacadeObserver {
    fn on_event(&self, event: ProviderEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        match event {
            ProviderEvent::FixBatch { fixes } => LocationFacade::handle_fix_batch(&inner, fixes),
            ProviderEvent::Failed { error } => inner.report_acquisition_error(&error),
            ProviderEvent::AuthorizationChanged { status } => {
                LocationFacade::handle_authorization_change(&inner, status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::LocationResult;

    #[derive(Default)]
    struct StubProvider {
        observer: Mutex<Option<Arc<dyn ProviderObserver>>>,
        distance_filters: Mutex<Vec<f64>>,
        start_calls: AtomicUsize,
        stop_calls: AtomicUsize,
        when_in_use_requests: AtomicUsize,
        always_requests: AtomicUsize,
        cached_fix: Mutex<Option<Coordinate>>,
        emit_on_start: Mutex<Option<ProviderEvent>>,
    }

    impl StubProvider {
        fn emit(&self, event: ProviderEvent) {
            let observer = self
                .observer
                .lock()
                .unwrap()
                .clone()
                .expect("observer registered");
            observer.on_event(event);
        }

        fn starts(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        fn stops(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }
    }

    impl LocationProvider for StubProvider {
        fn set_observer(&self, observer: Arc<dyn ProviderObserver>) {
            *self.observer.lock().unwrap() = Some(observer);
        }

        fn set_distance_filter(&self, meters: f64) -> LocationResult<()> {
            self.distance_filters.lock().unwrap().push(meters);
            Ok(())
        }

        fn start_updates(&self) -> LocationResult<()> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(event) = self.emit_on_start.lock().unwrap().take() {
                self.emit(event);
            }
            Ok(())
        }

        fn stop_updates(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn request_when_in_use_authorization(&self) -> LocationResult<()> {
            self.when_in_use_requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn request_always_authorization(&self) -> LocationResult<()> {
            self.always_requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn authorization_status(&self) -> AuthorizationStatus {
            AuthorizationStatus::NotDetermined
        }

        fn last_known_coordinate(&self) -> Option<Coordinate> {
            self.cached_fix.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        seen: Mutex<Vec<Coordinate>>,
    }

    impl LocationUpdateDelegate for RecordingDelegate {
        fn on_location_update(&self, _facade: &LocationFacade, coordinate: Coordinate) {
            self.seen.lock().unwrap().push(coordinate);
        }
    }

    fn fix(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
            altitude: None,
            horizontal_accuracy: None,
            vertical_accuracy: None,
            timestamp: 0,
        }
    }

    fn facade_with_stub() -> (LocationFacade, Arc<StubProvider>) {
        let stub = Arc::new(StubProvider::default());
        let facade = LocationFacade::with_provider(stub.clone());
        (facade, stub)
    }

    fn recorded_statuses(facade: &LocationFacade) -> Arc<Mutex<Vec<AuthorizationStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        facade.set_on_authorization_error(move |status| sink.lock().unwrap().push(status));
        seen
    }

    #[test]
    fn construction_pushes_default_distance_filter() {
        let (facade, stub) = facade_with_stub();
        assert_eq!(*stub.distance_filters.lock().unwrap(), vec![100.0]);
        assert_eq!(facade.distance_filter(), 100.0);
        assert!(facade.stop_after_first_fix());
        assert_eq!(
            facade.authorization_status(),
            AuthorizationStatus::NotDetermined
        );
    }

    #[test]
    fn request_starts_updates_once_per_call_unless_denied() {
        let statuses = [
            None,
            Some(AuthorizationStatus::NotDetermined),
            Some(AuthorizationStatus::Restricted),
            Some(AuthorizationStatus::AuthorizedAlways),
            Some(AuthorizationStatus::AuthorizedWhenInUse),
            Some(AuthorizationStatus::Unknown),
        ];

        for status in statuses {
            let (facade, stub) = facade_with_stub();
            if let Some(status) = status {
                stub.emit(ProviderEvent::AuthorizationChanged { status });
            }
            let before = stub.starts();
            facade.request_location_update();
            assert_eq!(stub.starts(), before + 1, "status {status:?}");
        }
    }

    #[test]
    fn request_when_denied_reports_error_without_starting() {
        let (facade, stub) = facade_with_stub();
        let seen = recorded_statuses(&facade);

        stub.emit(ProviderEvent::AuthorizationChanged {
            status: AuthorizationStatus::Denied,
        });
        assert_eq!(stub.starts(), 0);

        facade.request_location_update();
        assert_eq!(stub.starts(), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![AuthorizationStatus::Denied, AuthorizationStatus::Denied]
        );
    }

    #[test]
    fn distance_filter_change_reaches_provider() {
        let (facade, stub) = facade_with_stub();
        facade.set_distance_filter(10.0);
        assert_eq!(*stub.distance_filters.lock().unwrap(), vec![100.0, 10.0]);
        assert_eq!(facade.distance_filter(), 10.0);
    }

    #[test]
    fn first_fix_policy_stops_provider_and_delivers_newest() {
        let (facade, stub) = facade_with_stub();
        let recording = Arc::new(RecordingDelegate::default());
        let delegate: Arc<dyn LocationUpdateDelegate> = recording.clone();
        facade.set_update_delegate(&delegate);

        stub.emit(ProviderEvent::FixBatch {
            fixes: vec![fix(1.0, 1.0), fix(2.0, 2.0)],
        });

        assert_eq!(stub.stops(), 1);
        assert_eq!(*recording.seen.lock().unwrap(), vec![fix(2.0, 2.0)]);
    }

    #[test]
    fn continuous_mode_never_stops_on_receipt() {
        let (facade, stub) = facade_with_stub();
        facade.set_stop_after_first_fix(false);
        let recording = Arc::new(RecordingDelegate::default());
        let delegate: Arc<dyn LocationUpdateDelegate> = recording.clone();
        facade.set_update_delegate(&delegate);

        stub.emit(ProviderEvent::FixBatch {
            fixes: vec![fix(1.0, 1.0)],
        });
        stub.emit(ProviderEvent::FixBatch {
            fixes: vec![fix(2.0, 2.0)],
        });

        assert_eq!(stub.stops(), 0);
        assert_eq!(
            *recording.seen.lock().unwrap(),
            vec![fix(1.0, 1.0), fix(2.0, 2.0)]
        );
    }

    #[test]
    fn not_determined_prompts_for_when_in_use() {
        let (facade, stub) = facade_with_stub();
        stub.emit(ProviderEvent::AuthorizationChanged {
            status: AuthorizationStatus::NotDetermined,
        });
        assert_eq!(stub.when_in_use_requests.load(Ordering::SeqCst), 1);
        assert_eq!(stub.starts(), 0);
        assert_eq!(
            facade.authorization_status(),
            AuthorizationStatus::NotDetermined
        );
    }

    #[test]
    fn blocked_statuses_report_authorization_errors() {
        for status in [
            AuthorizationStatus::Restricted,
            AuthorizationStatus::Denied,
            AuthorizationStatus::Unknown,
        ] {
            let (facade, stub) = facade_with_stub();
            let seen = recorded_statuses(&facade);

            stub.emit(ProviderEvent::AuthorizationChanged { status });

            assert_eq!(*seen.lock().unwrap(), vec![status]);
            assert_eq!(stub.starts(), 0, "status {status:?}");
            assert_eq!(facade.authorization_status(), status);
        }
    }

    #[test]
    fn authorized_always_starts_updates() {
        let (facade, stub) = facade_with_stub();
        stub.emit(ProviderEvent::AuthorizationChanged {
            status: AuthorizationStatus::AuthorizedAlways,
        });
        assert_eq!(stub.starts(), 1);
        assert_eq!(stub.always_requests.load(Ordering::SeqCst), 0);
        assert_eq!(
            facade.authorization_status(),
            AuthorizationStatus::AuthorizedAlways
        );
    }

    #[test]
    fn when_in_use_grant_starts_updates_and_escalates() {
        let (facade, stub) = facade_with_stub();
        stub.emit(ProviderEvent::AuthorizationChanged {
            status: AuthorizationStatus::AuthorizedWhenInUse,
        });
        assert_eq!(stub.starts(), 1);
        assert_eq!(stub.always_requests.load(Ordering::SeqCst), 1);
        assert_eq!(
            facade.authorization_status(),
            AuthorizationStatus::AuthorizedWhenInUse
        );
    }

    #[test]
    fn provider_error_is_forwarded_verbatim() {
        let (facade, stub) = facade_with_stub();
        let seen: Arc<Mutex<Vec<LocationError>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        facade.set_on_error(move |error| sink.lock().unwrap().push(error.clone()));

        let error = LocationError::Platform {
            message: "signal lost".into(),
        };
        stub.emit(ProviderEvent::Failed {
            error: error.clone(),
        });

        assert_eq!(*seen.lock().unwrap(), vec![error]);
    }

    #[test]
    fn provider_error_without_handler_is_dropped() {
        let (_facade, stub) = facade_with_stub();
        stub.emit(ProviderEvent::Failed {
            error: LocationError::FixUnavailable,
        });
    }

    #[test]
    fn empty_fix_batch_is_ignored() {
        let (facade, stub) = facade_with_stub();
        let recording = Arc::new(RecordingDelegate::default());
        let delegate: Arc<dyn LocationUpdateDelegate> = recording.clone();
        facade.set_update_delegate(&delegate);

        stub.emit(ProviderEvent::FixBatch { fixes: vec![] });

        assert_eq!(stub.stops(), 0);
        assert!(recording.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropped_delegate_is_skipped_silently() {
        let (facade, stub) = facade_with_stub();
        let delegate: Arc<dyn LocationUpdateDelegate> =
            Arc::new(RecordingDelegate::default());
        facade.set_update_delegate(&delegate);
        drop(delegate);

        stub.emit(ProviderEvent::FixBatch {
            fixes: vec![fix(1.0, 1.0)],
        });

        // The stop policy still applies even when nobody is listening.
        assert_eq!(stub.stops(), 1);
    }

    #[test]
    fn last_known_coordinate_reflects_provider_cache() {
        let (facade, stub) = facade_with_stub();
        assert_eq!(facade.last_known_coordinate(), None);

        *stub.cached_fix.lock().unwrap() = Some(fix(3.0, 4.0));
        assert_eq!(facade.last_known_coordinate(), Some(fix(3.0, 4.0)));
    }

    #[test]
    fn synchronous_emission_from_start_does_not_deadlock() {
        let (facade, stub) = facade_with_stub();
        let recording = Arc::new(RecordingDelegate::default());
        let delegate: Arc<dyn LocationUpdateDelegate> = recording.clone();
        facade.set_update_delegate(&delegate);

        *stub.emit_on_start.lock().unwrap() = Some(ProviderEvent::FixBatch {
            fixes: vec![fix(5.0, 6.0)],
        });
        facade.request_location_update();

        assert_eq!(*recording.seen.lock().unwrap(), vec![fix(5.0, 6.0)]);
        assert_eq!(stub.stops(), 1);
    }
}

//! Android provider bridging the platform `LocationManager` via JNI.
//!
//! The Java/Kotlin side (`LocationBridge.kt`, compiled by the host Gradle
//! project) relays platform callbacks as JSON-encoded [`ProviderEvent`]s
//! through the `dispatchEvent`/`dispatchError` entry points, keyed by a
//! native handle registered at observer setup.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::jlong;
use jni::{JNIEnv, JavaVM};
use log::error;
use serde::de::DeserializeOwned;

use crate::provider::{LocationProvider, ProviderEvent, ProviderObserver};
use crate::{AuthorizationStatus, Coordinate, LocationError, LocationResult};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static RELAYS: OnceLock<Mutex<HashMap<u64, Arc<RelayEntry>>>> = OnceLock::new();

fn relays() -> &'static Mutex<HashMap<u64, Arc<RelayEntry>>> {
    RELAYS.get_or_init(|| Mutex::new(HashMap::new()))
}

struct RelayEntry {
    observer: Arc<dyn ProviderObserver>,
    cached_fix: Arc<Mutex<Option<Coordinate>>>,
    status: Arc<Mutex<AuthorizationStatus>>,
}

impl RelayEntry {
    fn relay(&self, event: ProviderEvent) {
        match &event {
            ProviderEvent::FixBatch { fixes } => {
                if let Some(newest) = fixes.last() {
                    *self.cached_fix.lock().expect("cached fix mutex poisoned") =
                        Some(newest.clone());
                }
            }
            ProviderEvent::AuthorizationChanged { status } => {
                *self.status.lock().expect("status mutex poisoned") = *status;
            }
            ProviderEvent::Failed { .. } => {}
        }
        self.observer.on_event(event);
    }
}

/// Provider backed by an Android Java/Kotlin bridge via JNI.
pub struct AndroidLocationProvider {
    vm: JavaVM,
    bridge: GlobalRef,
    handle: u64,
    observer: Mutex<Option<Arc<dyn ProviderObserver>>>,
    distance_filter: Mutex<Option<f64>>,
    cached_fix: Arc<Mutex<Option<Coordinate>>>,
    status: Arc<Mutex<AuthorizationStatus>>,
}

impl fmt::Debug for AndroidLocationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AndroidLocationProvider")
            .field("handle", &self.handle)
            .finish()
    }
}

impl AndroidLocationProvider {
    /// Creates a provider from a `LocationBridge` object.
    ///
    /// # Errors
    /// Returns an error if the JVM reference cannot be taken.
    pub fn new(env: &JNIEnv<'_>, bridge: JObject<'_>) -> LocationResult<Self> {
        let vm = env.get_java_vm().map_err(map_jni_error)?;
        let global = env.new_global_ref(bridge).map_err(map_jni_error)?;
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);

        Ok(Self {
            vm,
            bridge: global,
            handle,
            observer: Mutex::new(None),
            distance_filter: Mutex::new(None),
            cached_fix: Arc::new(Mutex::new(None)),
            status: Arc::new(Mutex::new(AuthorizationStatus::NotDetermined)),
        })
    }

    /// Native handle associated with this provider for callbacks from
    /// Java/Kotlin.
    #[must_use]
    pub fn handle(&self) -> u64 {
        self.handle
    }

    fn with_attached_env<F>(&self, action: F) -> LocationResult<()>
    where
        F: FnOnce(&mut JNIEnv<'_>, &JObject<'_>) -> jni::errors::Result<()>,
    {
        let mut env = self.vm.attach_current_thread().map_err(map_jni_error)?;
        let bridge = self.bridge.as_obj();
        action(&mut env, &bridge).map_err(map_jni_error)
    }

    fn with_bridge<F>(&self, action: F) -> LocationResult<()>
    where
        F: FnOnce(&mut JNIEnv<'_>, &JObject<'_>) -> jni::errors::Result<()>,
    {
        if self
            .observer
            .lock()
            .expect("observer mutex poisoned")
            .is_none()
        {
            return Err(LocationError::ObserverMissing);
        }

        self.with_attached_env(action)
    }

    fn register_handle(&self) -> LocationResult<()> {
        self.with_attached_env(|env, bridge| {
            let args = [JValue::Long(self.handle as jlong)];
            env.call_method(bridge, "registerNativeHandle", "(J)V", &args)?;
            Ok(())
        })
    }

    fn apply_distance_filter(&self, meters: f64) -> LocationResult<()> {
        self.with_bridge(|env, bridge| {
            let args = [JValue::Double(meters)];
            env.call_method(bridge, "setDistanceFilter", "(D)V", &args)?;
            Ok(())
        })
    }
}

impl LocationProvider for AndroidLocationProvider {
    fn set_observer(&self, observer: Arc<dyn ProviderObserver>) {
        {
            let mut guard = self.observer.lock().expect("observer mutex poisoned");
            *guard = Some(observer.clone());
        }

        {
            let entry = Arc::new(RelayEntry {
                observer,
                cached_fix: Arc::clone(&self.cached_fix),
                status: Arc::clone(&self.status),
            });
            let mut map = relays().lock().expect("relay map mutex poisoned");
            map.insert(self.handle, entry);
        }

        if let Err(err) = self.register_handle() {
            error!("failed to register Android location handle: {err}");
        }

        let filter = *self
            .distance_filter
            .lock()
            .expect("distance filter mutex poisoned");
        if let Some(meters) = filter {
            if let Err(err) = self.apply_distance_filter(meters) {
                error!("failed to restore distance filter: {err}");
            }
        }
    }

    fn set_distance_filter(&self, meters: f64) -> LocationResult<()> {
        {
            let mut guard = self
                .distance_filter
                .lock()
                .expect("distance filter mutex poisoned");
            *guard = Some(meters);
        }

        if self
            .observer
            .lock()
            .expect("observer mutex poisoned")
            .is_none()
        {
            // Applied when the observer is registered.
            return Ok(());
        }
        self.apply_distance_filter(meters)
    }

    fn start_updates(&self) -> LocationResult<()> {
        self.with_bridge(|env, bridge| {
            env.call_method(bridge, "startUpdates", "()V", &[])?;
            Ok(())
        })
    }

    fn stop_updates(&self) {
        if let Err(err) = self.with_bridge(|env, bridge| {
            env.call_method(bridge, "stopUpdates", "()V", &[])?;
            Ok(())
        }) {
            error!("failed to stop Android updates: {err}");
        }
    }

    fn request_when_in_use_authorization(&self) -> LocationResult<()> {
        self.with_bridge(|env, bridge| {
            env.call_method(bridge, "requestWhenInUseAuthorization", "()V", &[])?;
            Ok(())
        })
    }

    fn request_always_authorization(&self) -> LocationResult<()> {
        self.with_bridge(|env, bridge| {
            env.call_method(bridge, "requestAlwaysAuthorization", "()V", &[])?;
            Ok(())
        })
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

impl Drop for AndroidLocationProvider {
    fn drop(&mut self) {
        if let Some(map) = RELAYS.get() {
            let mut guard = map.lock().expect("relay map mutex poisoned");
            guard.remove(&self.handle);
        }
    }
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_pinpoint_location_LocationBridge_dispatchEvent(
    mut env: JNIEnv<'_>,
    _class: JClass<'_>,
    handle: jlong,
    json_event: JString<'_>,
) {
    #[allow(clippy::cast_sign_loss)]
    let handle = handle as u64;
    let json = match env.get_string(&json_event) {
        Ok(value) => value.to_string_lossy().into_owned(),
        Err(err) => {
            error!("failed to read Android event payload: {err}");
            return;
        }
    };

    dispatch_event(handle, &json);
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_pinpoint_location_LocationBridge_dispatchError(
    mut env: JNIEnv<'_>,
    _class: JClass<'_>,
    handle: jlong,
    message: JString<'_>,
) {
    #[allow(clippy::cast_sign_loss)]
    let handle = handle as u64;
    let message = match env.get_string(&message) {
        Ok(value) => value.to_string_lossy().into_owned(),
        Err(err) => {
            error!("failed to read Android error payload: {err}");
            return;
        }
    };

    let error = LocationError::Platform { message };
    emit_event(handle, ProviderEvent::Failed { error });
}

fn dispatch_event(handle: u64, json: &str) {
    match from_json::<ProviderEvent>(json) {
        Ok(event) => emit_event(handle, event),
        Err(err) => {
            let error = LocationError::Serialization {
                message: err.to_string(),
            };
            emit_event(handle, ProviderEvent::Failed { error });
        }
    }
}

fn emit_event(handle: u64, event: ProviderEvent) {
    let entry = {
        let map = relays().lock().expect("relay map mutex poisoned");
        map.get(&handle).cloned()
    };

    if let Some(entry) = entry {
        entry.relay(event);
    } else {
        error!("received Android location event for unknown handle {handle}");
    }
}

fn from_json<T: DeserializeOwned>(value: &str) -> LocationResult<T> {
    serde_json::from_str(value).map_err(|err| LocationError::Serialization {
        message: err.to_string(),
    })
}

#[allow(clippy::needless_pass_by_value)]
fn map_jni_error(err: jni::errors::Error) -> LocationError {
    LocationError::Platform {
        message: err.to_string(),
    }
}

use std::ffi::CString;
use std::sync::{Arc, Mutex, MutexGuard};
use interoptopus::{ffi_function, function, callback, Inventory, InventoryBuilder};
use interoptopus::patterns::{slice::FFISlice, string::AsciiPointer};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing::{Event, Subscriber, error, info, warn, field::{Field, Visit}};
use tracing_subscriber::{layer::Context, Layer, registry::LookupSpan, prelude::*};
use once_cell::sync::Lazy;
use crate::config::ReceiverConfig;
use crate::ingress::Ingress;
use crate::storage::Storage;
use crate::types::SceneEvent;
use crate::utils::create_metrics;
#[cfg(feature = "console-tracing")]
use std::time::Duration;

/// Returns the version of this API.
#[ffi_function]
#[no_mangle]
pub extern "C" fn version() -> u32 {
    0x00_01_00_00
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Define a callback type for logging messages to the application that uses this library.
callback!(DebugCallback(message: AsciiPointer, log_level: AsciiPointer));

// Use a static mutable callback for logging messages to the application that uses this library.
static DEBUG_CALLBACK: Lazy<Arc<Mutex<Option<DebugCallback>>>> = Lazy::new(|| Arc::new(Mutex::new(None)));

/// Registers a callback for logging messages to the application that uses this library.
#[ffi_function]
#[no_mangle]
pub extern "C" fn register_debug_callback(callback: DebugCallback) {
    let mut callback_guard = lock(&DEBUG_CALLBACK);
    *callback_guard = Some(callback);
}

#[ffi_function]
#[no_mangle]
pub extern "C" fn unregister_debug_callback() {
    let mut callback_guard = lock(&DEBUG_CALLBACK);
    *callback_guard = None;
}

/// Logs a message to the application if a callback is registered.
fn log_to_application(message: &str, log_level: &str, location: &str) {
    let callback_guard = lock(&DEBUG_CALLBACK);
    if let Some(ref callback) = *callback_guard {
        // If the message is empty or equal to "No message", don't log it
        if message.is_empty() || message == "No message" {
            return;
        }
        let full_message = format!("{}\n{}", message, location);
        // Convert the message to a CString
        match (CString::new(full_message), CString::new(log_level)) {
            (Ok(c_message), Ok(c_log_level)) => callback.call(
                AsciiPointer::from_cstr(c_message.as_c_str()),
                AsciiPointer::from_cstr(c_log_level.as_c_str()),
            ),
            _ => eprintln!("Failed to convert message to CString: Message contains interior null byte"),
        }
    }
}

struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        }
    }
}

// Custom tracing Layer that forwards logs to Unity Debug.Log.
pub struct ApplicationLoggingLayer {
    pub log_level: Level,
}

impl<S> Layer<S> for ApplicationLoggingLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_event(&self, event: &Event, _ctx: Context<S>) {
        let log_level = *event.metadata().level();
        // Ignore logs that are below the log level
        if log_level < self.log_level {
            return;
        }

        let mut visitor = MessageVisitor { message: None };
        event.record(&mut visitor);

        let message = visitor.message.unwrap_or_else(|| "No message".to_string());
        let log_level = format!("{:?}", log_level);
        let location = event.metadata().name().to_string();

        log_to_application(&message, &log_level, &location);
    }
}

fn install_subscriber(log_level: LevelFilter) {
    // Build the FmtSubscriber layer
    let fmt_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(log_level);

    let app_layer = ApplicationLoggingLayer { log_level: log_level.into_level().unwrap_or(Level::INFO) }.with_filter(log_level);

    #[cfg(feature = "console-tracing")]
    let subscriber = {
        let console_layer = console_subscriber::ConsoleLayer::builder()
            .retention(Duration::from_secs(60))
            .server_addr(([127, 0, 0, 1], 6669))
            .spawn();
        tracing_subscriber::registry()
            .with(console_layer)
            .with(fmt_layer)
            .with(app_layer)
    };

    #[cfg(not(feature = "console-tracing"))]
    let subscriber = {
        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(app_layer)
    };

    // A host that re-initializes after `shutdown` keeps the first subscriber.
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("Global subscriber already set, keeping it");
    }
}

// Use a static mutable Ingress wrapped in an Arc<Mutex> for safe concurrent access
static INGRESS_INSTANCE: Lazy<Arc<Mutex<Option<Ingress>>>> = Lazy::new(|| Arc::new(Mutex::new(None)));

/// Starts listening for organ sessions on `port`.
/// Vertices are multiplied by `unit_scale`. Returns false if the receiver
/// could not be started or is already running.
#[ffi_function]
#[no_mangle]
pub extern "C" fn init(
    log_level: u32,
    port: u16,
    unit_scale: f32,
) -> bool {
    let mut ingress_guard = lock(&INGRESS_INSTANCE);
    if ingress_guard.is_some() {
        error!("Ingress already started");
        return false;
    }

    // Map the LogLevel enum to the LevelFilter enum
    let log_level = match log_level {
        0 => LevelFilter::TRACE,
        1 => LevelFilter::DEBUG,
        2 => LevelFilter::INFO,
        3 => LevelFilter::WARN,
        4 => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };
    install_subscriber(log_level);

    if let Err(e) = create_metrics() {
        warn!("Metrics unavailable: {}", e);
    }

    let config = ReceiverConfig {
        port,
        unit_scale,
        ..Default::default()
    };
    let ingress = match Ingress::new(config) {
        Ok(ingress) => ingress,
        Err(e) => {
            error!("Invalid receiver configuration: {}", e);
            return false;
        }
    };
    match ingress.initialize() {
        Ok(addr) => info!("Organ receiver listening on {}", addr),
        Err(e) => {
            error!("Failed to start the organ receiver: {}", e);
            return false;
        }
    }

    *ingress_guard = Some(ingress);
    true
}

/// Stops accepting, aborts the running session and closes its socket.
#[ffi_function]
#[no_mangle]
pub extern "C" fn shutdown() {
    let ingress = lock(&INGRESS_INSTANCE).take();
    if let Some(ingress) = ingress {
        ingress.shutdown();
    }
}

callback!(OrganCallback(
    label: i32,
    coordinates: FFISlice<f32>,
    indices: FFISlice<u32>,
    color: FFISlice<f32>
));

// `attached` is 0 when the child lost its parent, `parent` is then -1.
callback!(HierarchyCallback(child: i32, parent: i32, attached: u8));

callback!(RemovalCallback(label: i32));

// UTF-8 JSON of the patient record and analysis summary.
callback!(PatientCallback(json: FFISlice<u8>));

callback!(SessionCallback(session_id: u64, started: u8, organ_count: u32, failed: u8));

#[derive(Clone)]
struct SceneCallbacks {
    organ: OrganCallback,
    hierarchy: HierarchyCallback,
    removal: RemovalCallback,
    patient: PatientCallback,
    session: SessionCallback,
}

static SCENE_CALLBACKS: Lazy<Arc<Mutex<Option<SceneCallbacks>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

#[ffi_function]
#[no_mangle]
pub extern "C" fn scene_subscribe(
    organ_callback: OrganCallback,
    hierarchy_callback: HierarchyCallback,
    removal_callback: RemovalCallback,
    patient_callback: PatientCallback,
    session_callback: SessionCallback,
) {
    // Save the callbacks in a global variable to keep them alive
    let mut callbacks_guard = lock(&SCENE_CALLBACKS);
    *callbacks_guard = Some(SceneCallbacks {
        organ: organ_callback,
        hierarchy: hierarchy_callback,
        removal: removal_callback,
        patient: patient_callback,
        session: session_callback,
    });
}

#[ffi_function]
#[no_mangle]
pub extern "C" fn scene_unsubscribe() {
    let mut callbacks_guard = lock(&SCENE_CALLBACKS);
    *callbacks_guard = None;
}

fn dispatch(event: SceneEvent, callbacks: &SceneCallbacks) {
    match event {
        SceneEvent::SessionStarted { session_id, .. } => callbacks.session.call(session_id, 1, 0, 0),
        SceneEvent::Patient(data) => match serde_json::to_vec(&data) {
            Ok(json) => callbacks.patient.call(json.as_slice().into()),
            Err(e) => error!("Failed to serialize patient record: {}", e),
        },
        SceneEvent::OrganCreated { mesh, color } => callbacks.organ.call(
            mesh.label,
            mesh.coordinates().into(),
            mesh.indices.as_slice().into(),
            color.as_slice().into(),
        ),
        SceneEvent::OrganRemoved { label } => callbacks.removal.call(label),
        SceneEvent::Reparented { child, parent } => callbacks.hierarchy.call(child, parent, 1),
        SceneEvent::Detached { child } => callbacks.hierarchy.call(child, -1, 0),
        SceneEvent::SessionEnded(summary) => callbacks.session.call(
            summary.session_id,
            0,
            summary.organs_created as u32,
            summary.error.is_some() as u8,
        ),
    }
}

/// Hands up to `max_events` events from `storage` to `callbacks`. Nothing is
/// consumed without callbacks, so the host misses no event while unsubscribed.
fn deliver(storage: &Storage, callbacks: Option<&SceneCallbacks>, max_events: u32) -> u32 {
    let Some(callbacks) = callbacks else {
        return 0;
    };

    let mut delivered = 0;
    while delivered < max_events {
        match storage.consume_event() {
            Some(event) => {
                dispatch(event, callbacks);
                delivered += 1;
            }
            None => break,
        }
    }
    delivered
}

/// Delivers up to `max_events` pending scene events to the subscribed
/// callbacks on the calling thread. Returns how many were delivered.
#[ffi_function]
#[no_mangle]
pub extern "C" fn poll_scene(max_events: u32) -> u32 {
    // Clone both out so a callback may call back into this library.
    let storage = match *lock(&INGRESS_INSTANCE) {
        Some(ref ingress) => ingress.get_storage(),
        None => return 0,
    };
    let callbacks = lock(&SCENE_CALLBACKS).clone();

    deliver(&storage, callbacks.as_ref(), max_events)
}

pub fn build_binding_inventory() -> Inventory {
    InventoryBuilder::new()
        .register(function!(version))
        .register(function!(register_debug_callback))
        .register(function!(unregister_debug_callback))
        .register(function!(init))
        .register(function!(shutdown))
        .register(function!(scene_subscribe))
        .register(function!(scene_unsubscribe))
        .register(function!(poll_scene))
        .inventory()
}

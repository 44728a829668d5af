use organ_receiver::{args::{get_log_level_filter, parse_args}, ingress::Ingress, types::SceneEvent, utils::create_metrics};
use shared_utils::types::organ_name;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // Build the FmtSubscriber layer
    let fmt_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(get_log_level_filter(&args));

    // Initialize console tracing if enabled
    #[cfg(feature = "console-tracing")]
    let subscriber = {
        let console_layer = console_subscriber::ConsoleLayer::builder()
            .retention(Duration::from_secs(60))
            .server_addr(([127, 0, 0, 1], 6669))
            .spawn();
        tracing_subscriber::registry()
            .with(console_layer)
            .with(fmt_layer)
    };

    #[cfg(not(feature = "console-tracing"))]
    let subscriber = {
        tracing_subscriber::registry()
            .with(fmt_layer)
    };

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting organ receiver (headless)");
    info!("{:?}", args);

    create_metrics()?;

    let config = args.to_config()?;
    let ingress = Ingress::new(config)?;
    let addr = ingress.initialize()?;
    info!("Organ receiver listening on {}", addr);

    // Get the storage
    let storage = ingress.get_storage();

    // Stand-in for the render loop: drain whatever arrived once per frame
    let frame_duration = Duration::from_secs_f32(1.0 / args.fps.max(1) as f32);
    let per_frame = args.event_capacity.max(1);
    loop {
        let start = Instant::now();

        for event in storage.drain(per_frame) {
            match event {
                SceneEvent::SessionStarted { session_id, peer } => {
                    info!("Session {} started from {:?}, clearing scene", session_id, peer)
                }
                SceneEvent::Patient(data) => info!(
                    "Patient {:?}: liver {:.1} ml, {} tumors ({:.1} ml)",
                    data.patient.name,
                    data.analysis.liver_volume_ml,
                    data.analysis.tumor_count,
                    data.analysis.total_tumor_volume_ml
                ),
                SceneEvent::OrganCreated { mesh, color } => info!(
                    "Organ {} ({}): {} vertices, {} triangles, color {:?}",
                    mesh.label,
                    organ_name(mesh.label),
                    mesh.vertices.len(),
                    mesh.triangle_count(),
                    color
                ),
                SceneEvent::OrganRemoved { label } => info!("Organ {} replaced", label),
                SceneEvent::Reparented { child, parent } => info!("Organ {} nested under {}", child, parent),
                SceneEvent::Detached { child } => info!("Organ {} detached", child),
                SceneEvent::SessionEnded(summary) => match summary.error {
                    Some(e) => warn!("Session {} failed after {} organs: {}", summary.session_id, summary.organs_created, e),
                    None => info!("Session {} done, {} organs", summary.session_id, summary.organs_created),
                },
            }
        }
        storage.pending_scene_events.set(storage.pending_events() as i64);

        // Wait for the remaining time
        let elapsed = start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        } else {
            error!("Frame took {:?}, longer than the target {:?}", elapsed, frame_duration);
        }
    }
}

//! depthcam: run the depth camera pipeline and report the newest frame pair

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use depthcam::capture::{SyntheticContext, SyntheticDevice};
use depthcam::pipeline::FrameRings;
use depthcam::{utils, Config, DepthCamera, Source};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("depthcam=info"));

    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }
}

#[cfg(feature = "realsense")]
fn open_device(config: &Config) -> DepthCamera {
    match depthcam::capture::RealsenseContext::new() {
        Ok(context) => DepthCamera::with_config(context, &config.camera, &config.acquisition),
        Err(e) => {
            error!("RealSense context unavailable: {e}");
            DepthCamera::open(config.camera.width, config.camera.height, config.camera.fps)
        }
    }
}

#[cfg(not(feature = "realsense"))]
fn open_device(config: &Config) -> DepthCamera {
    DepthCamera::open(config.camera.width, config.camera.height, config.camera.fps)
}

fn report(camera: &DepthCamera, rings: &FrameRings) {
    let stats = camera.stats();
    let profile = camera.profile();
    let center = (profile.height as usize / 2) * profile.width as usize + profile.width as usize / 2;

    match rings.depth.latest() {
        Some((index, slot)) => info!(
            index,
            age_ms = utils::frame_age_ms(slot.timestamp),
            center_depth = slot.depth_values().nth(center).unwrap_or(0),
            color_frames = stats.color_published,
            depth_frames = stats.depth_published,
            skipped = stats.depth_skipped,
            rejected = stats.payload_rejected,
            contended = stats.ring_contended,
            slots_skipped = rings.color.stats().skipped + rings.depth.stats().skipped,
            "Newest depth pair"
        ),
        None => info!("No depth pair published yet"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("depthcam launching...");

    let config = Config::load()?;
    info!("Configuration: {:?}", config);

    let mut camera = match config.app.source {
        Source::Synthetic => DepthCamera::with_config(
            SyntheticContext::with_device(SyntheticDevice::pattern("synthetic")),
            &config.camera,
            &config.acquisition,
        ),
        Source::Device => open_device(&config),
    };
    if !camera.ok() {
        return Err(eyre!("Failed to open depth camera: {}", camera.error()));
    }
    info!(
        "Auto exposure: {}, auto white balance: {}",
        camera.auto_exposure(),
        camera.auto_white_balance()
    );

    let rings = camera
        .rings()
        .ok_or_else(|| eyre!("Depth camera has no frame buffers"))?;

    let mut ticker = tokio::time::interval(Duration::from_millis(config.app.report_interval_ms.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Ctrl-C received");
                break;
            }
            _ = ticker.tick() => {
                if let Some(fault) = camera.fault() {
                    error!("Acquisition stopped: {fault}");
                    break;
                }
                report(&camera, &rings);
            }
        }
    }

    if let Some(dir) = &config.app.snapshot_path {
        match rings.snapshot_depth() {
            Some((index, slot)) => {
                utils::save_snapshot(&slot, &camera.profile(), dir, &format!("frame_{index}"))?;
            }
            None => warn!("No depth pair to snapshot"),
        }
    }

    drop(rings);
    camera.close();

    info!("depthcam shutting down");
    Ok(())
}

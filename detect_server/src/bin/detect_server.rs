//! Detect server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use detect_server::{
    encoder::JpegEncoder,
    endpoints::{router, AppState},
    inferer::{find_font, Detector, ModelDetector, SYSTEM_FONTS},
    meter::spawn_meter_logger,
    nn::{YoloModel, YoloSettings, DEFAULT_MODEL_URL},
    sensors::{CameraSettings, V4lSensor},
    streamer::{StreamController, StreamSettings},
    uploads::UploadStore,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the HTTP server
    #[clap(long, default_value = "127.0.0.1:5000")]
    server_address: String,

    /// Camera device streamed by `/video_feed`
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Capture format of the camera (MJPG, RGB3 or BGR3)
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Capture resolution as WIDTHxHEIGHT, the largest supported if unset
    #[clap(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Capture frames per second, the highest supported if unset
    #[clap(long)]
    frame_rate: Option<u32>,

    /// Quality of streamed JPEG frames
    #[clap(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// ONNX model file, downloaded to the cache directory if unset
    #[clap(long)]
    model_path: Option<PathBuf>,

    /// URL the model is downloaded from if it does not exist locally
    #[clap(long, default_value = DEFAULT_MODEL_URL)]
    model_url: String,

    /// Edge length of the square model input
    #[clap(long, default_value_t = 640)]
    input_size: u32,

    /// Minimum confidence of reported detections
    #[clap(long, default_value_t = 0.25)]
    min_confidence: f32,

    /// Maximum overlap of two reported detections
    #[clap(long, default_value_t = 0.45)]
    max_iou: f32,

    /// TTF font used to label detections, a common system font if unset
    #[clap(long)]
    font_path: Option<PathBuf>,

    /// Directory uploaded images are written to
    #[clap(long, default_value = "static/uploads")]
    upload_dir: PathBuf,

    /// Directory annotated results are written to
    #[clap(long, default_value = "static/results")]
    result_dir: PathBuf,

    /// Time allowed to produce one streamed frame in milliseconds, 0 to wait forever
    #[clap(long, default_value_t = 5000)]
    frame_timeout_ms: u64,
}

fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    match value.split_once(['x', 'X']) {
        Some((width, height)) => Ok((width.trim().parse()?, height.trim().parse()?)),
        None => bail!("expected WIDTHxHEIGHT, got {value}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // Build detector shared by uploads and camera streams
    let model = YoloModel::new(&YoloSettings {
        model_path: args.model_path.clone(),
        model_url: args.model_url.clone(),
        input_size: args.input_size,
        min_confidence: args.min_confidence,
        max_iou: args.max_iou,
    })
    .await?;
    let font_path = args.font_path.clone().or_else(|| find_font(&SYSTEM_FONTS));
    let detector = match &font_path {
        Some(font_path) => {
            log::info!("Labelling detections with {}", font_path.display());
            ModelDetector::new(model).with_font(font_path)?
        }
        None => {
            log::warn!("No font found, detections are drawn without labels. Set --font-path to label them");
            ModelDetector::new(model)
        }
    };
    let detector: Arc<dyn Detector> = Arc::new(detector);

    let sensor = V4lSensor::new(CameraSettings {
        format: args.format.clone(),
        resolution: args.resolution,
        frame_rate: args.frame_rate,
    });
    let controller = StreamController::new(
        Arc::new(sensor),
        Arc::clone(&detector),
        Arc::new(JpegEncoder::new(args.jpeg_quality)),
        StreamSettings {
            device: args.device.clone(),
            frame_timeout: match args.frame_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        },
    );

    let state = Arc::new(AppState {
        controller,
        detector,
        store: UploadStore::new(&args.upload_dir, &args.result_dir)?,
    });

    spawn_meter_logger();

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(router(state).into_make_service())
        .await?;

    Ok(())
}

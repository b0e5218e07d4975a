use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cardlens::pipeline::classification::{Label, TemplateClassifier};
use cardlens::tracking::ReplayTracker;
use cardlens::{AppError, Coordinator, Settings};
use image::DynamicImage;
use tracing::{info, warn, Level};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn init_logging(level: Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn load_classifier(settings: &Settings) -> Result<TemplateClassifier, AppError> {
    let min_confidence = settings.classifier.min_confidence;
    match &settings.classifier.template_dir {
        Some(dir) => {
            let classifier = TemplateClassifier::from_dir(dir, min_confidence)?;
            info!("Loaded {} templates from {}", classifier.len(), dir.display());
            Ok(classifier)
        }
        None => {
            warn!("No template directory configured, every card will fail classification");
            Ok(TemplateClassifier::from_images(
                Vec::<(Label, DynamicImage)>::new(),
                min_confidence,
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(settings_path.as_deref())?;
    init_logging(settings.max_log_level());

    let script = settings.replay.script.clone().ok_or_else(|| {
        AppError::InvalidConfiguration("No replay script configured".to_string())
    })?;
    let tracker = ReplayTracker::from_file(&script, settings.pipeline.event_buffer_size)?;
    let classifier = load_classifier(&settings)?;

    let mut coordinator = Coordinator::builder(settings)
        .tracker(Box::new(tracker))
        .classifier(Arc::new(classifier))
        .build()?;
    let handle = coordinator.handle();

    let snapshot = handle.wait_idle(IDLE_POLL_INTERVAL).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    handle.shutdown();
    coordinator.join().await?;
    Ok(())
}

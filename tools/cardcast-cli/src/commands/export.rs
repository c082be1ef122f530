//! Export a card animation to WebM or GIF.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use cardcast_common::config::AppConfig;
use cardcast_export_engine::surface::{ImageSequence, SyntheticCard};
use cardcast_export_engine::{
    ExportConfig, ExportFormat, ExportProgress, ExportSession, SurfaceProvider,
};

use crate::ExportArgs;

pub async fn run(args: ExportArgs, app: &AppConfig) -> anyhow::Result<()> {
    let defaults = &app.export;
    let config = ExportConfig {
        fps: args.fps.unwrap_or(defaults.fps),
        duration_ms: args.duration_ms.unwrap_or(defaults.duration_ms),
        bitrate: args.bitrate.unwrap_or(defaults.bitrate),
        background: Some(args.background.unwrap_or(defaults.background)),
        debug_frame_counter: args.debug_frame_counter || defaults.debug_frame_counter,
        ..ExportConfig::default()
    };
    config.validate()?;

    let provider: Box<dyn SurfaceProvider> = match &args.frames {
        Some(dir) => {
            println!("Exporting frames from: {}", dir.display());
            Box::new(ImageSequence::new(dir, args.sequence_fps))
        }
        None => {
            println!("Exporting synthetic test card");
            Box::new(SyntheticCard::new(args.width, args.height))
        }
    };

    let format = args.format;
    let output_path = args
        .output
        .unwrap_or_else(|| default_output_path(app, format));
    println!("  Output: {}", output_path.display());
    println!(
        "  {}: {} fps, {} ms, {} bit/s",
        format, config.fps, config.duration_ms, config.bitrate
    );

    let session = match format {
        ExportFormat::Webm => ExportSession::new(config, provider, super::encoder_backend()?),
        ExportFormat::Gif => ExportSession::gif(config, provider),
    };
    let stop_flag = session.stop_flag();
    let mut session = session.with_progress(Box::new(|p: &ExportProgress| {
        print!(
            "\r  {:>5.1}%  {:<28}",
            p.fraction() * 100.0,
            p.message
        );
        let _ = std::io::stdout().flush();
    }));

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling export");
            stop_flag.store(true, Ordering::SeqCst);
        }
    });

    let result = session.run().await;
    ctrl_c.abort();
    println!();

    let artifact = result?;
    artifact.write_to(&output_path)?;
    let encoding = match artifact.codec {
        Some(codec) => codec.to_string(),
        None => artifact.format.to_string().to_uppercase(),
    };
    println!(
        "Export complete: {} ({} frames, {:.2}s, {}, {} bytes)",
        output_path.display(),
        artifact.frame_count,
        artifact.duration.as_secs_f64(),
        encoding,
        artifact.len()
    );
    Ok(())
}

fn default_output_path(app: &AppConfig, format: ExportFormat) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    app.output_dir.join(format!("card-{stamp}.{}", format.extension()))
}

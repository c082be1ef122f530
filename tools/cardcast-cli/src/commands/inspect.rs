//! Show the structure of a WebM file.

use std::path::PathBuf;

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let summary = cardcast_webm::inspect(&bytes)
        .map_err(|e| anyhow::anyhow!("{} is not a readable WebM file: {e}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("File: {} ({} bytes)", path.display(), bytes.len());
    println!("  Doc type:       {}", summary.doc_type);
    if let Some(app) = &summary.muxing_app {
        println!("  Muxing app:     {app}");
    }
    if let Some(scale) = summary.timecode_scale {
        println!("  Timecode scale: {scale} ns");
    }
    if let Some(duration) = summary.duration {
        println!("  Duration:       {duration:.3}");
    }
    println!("  Tracks:         {}", summary.track_count);
    if let Some(codec) = &summary.codec_id {
        println!("  Codec:          {codec}");
    }
    if let (Some(w), Some(h)) = (summary.width, summary.height) {
        println!("  Resolution:     {w}x{h}");
    }
    println!("  Clusters:       {}", summary.cluster_count);
    println!(
        "  Blocks:         {} ({} keyframes)",
        summary.blocks.len(),
        summary.key_frame_count()
    );
    if !summary.timecodes_non_decreasing() {
        println!("  [WARN] Block timecodes go backwards");
    }
    if let Some(first) = summary.blocks.first() {
        if !first.key_frame {
            println!("  [WARN] First block is not a keyframe");
        }
    }
    Ok(())
}

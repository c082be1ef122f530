//! Check which codecs the encoder backend accepts.

use cardcast_export_engine::{EncoderBackend, EncoderConfig, CODEC_PREFERENCE};

pub async fn run() -> anyhow::Result<()> {
    println!("Cardcast Encoder Check");
    println!("{}", "=".repeat(50));

    let backend = match super::encoder_backend() {
        Ok(backend) => backend,
        Err(e) => {
            println!("[MISSING] {e}");
            return Ok(());
        }
    };
    println!("[OK] Backend: {}", backend.name());

    let mut negotiated = None;
    for codec in CODEC_PREFERENCE {
        let probe = EncoderConfig {
            codec,
            width: 640,
            height: 480,
            frame_rate: 30,
            bitrate: 2_500_000,
        };
        if backend.is_config_supported(&probe).await {
            println!("[OK] {} ({})", codec, probe.codec_string());
            if negotiated.is_none() {
                negotiated = Some(codec);
            }
        } else {
            println!("[MISSING] {} ({})", codec, probe.codec_string());
        }
    }

    println!();
    match negotiated {
        Some(codec) => println!("Exports will use {codec}."),
        None => {
            println!("No supported codec. Install the GStreamer vpx plugin (gst-plugins-good).")
        }
    }
    Ok(())
}

pub mod check;
pub mod config;
pub mod export;
pub mod inspect;

use cardcast_export_engine::EncoderBackend;

/// The encoder backend compiled into this binary.
pub fn encoder_backend() -> anyhow::Result<Box<dyn EncoderBackend>> {
    #[cfg(feature = "gstreamer")]
    {
        Ok(Box::new(
            cardcast_export_engine::encoder::GstEncoderBackend::new(),
        ))
    }
    #[cfg(not(feature = "gstreamer"))]
    {
        Err(anyhow::anyhow!(
            "cardcast was built without an encoder backend; rebuild with `--features gstreamer`"
        ))
    }
}

//! VP8/VP9 encoding through GStreamer's libvpx elements.
//!
//! Pipeline: `appsrc ! videoconvert ! vp9enc|vp8enc ! appsink`. Frames are
//! pushed as raw RGB with their nominal timestamps, rows padded to the
//! stride the negotiated `VideoInfo` expects. The appsink callback forwards
//! every encoded buffer to the chunk channel as soon as the streaming thread
//! produces it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use cardcast_common::error::{CardcastError, CardcastResult};
use cardcast_webm::{ChunkType, EncodedChunk, VideoCodec};

use super::{ChunkSender, EncoderBackend, EncoderConfig};
use crate::frame::Frame;

/// How long `flush` waits for end-of-stream to reach the sink.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn init_gstreamer() -> CardcastResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(CardcastError::configuration(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn encoder_element(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::Vp9 => "vp9enc",
        VideoCodec::Vp8 => "vp8enc",
    }
}

struct Running {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    /// Bytes per row the caps imply, at least `width * 3`.
    stride: usize,
    /// Bytes per frame the caps imply.
    frame_size: usize,
    eos_sent: bool,
}

/// Encoder backend built on a GStreamer pipeline.
#[derive(Default)]
pub struct GstEncoderBackend {
    running: Option<Running>,
    frame_duration: Option<gst::ClockTime>,
    emitted: Arc<AtomicU64>,
}

impl GstEncoderBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn running(&mut self) -> CardcastResult<&mut Running> {
        self.running
            .as_mut()
            .ok_or_else(|| CardcastError::encode("GStreamer encoder is not configured"))
    }

    fn build_pipeline(
        config: &EncoderConfig,
        output: ChunkSender,
        emitted: Arc<AtomicU64>,
    ) -> CardcastResult<Running> {
        let to_i32 = |value: u32, what: &str| {
            i32::try_from(value)
                .map_err(|_| CardcastError::configuration(format!("{what} too large: {value}")))
        };
        let fps = to_i32(config.frame_rate, "frame rate")?;
        let bitrate = to_i32(config.bitrate, "bitrate")?;

        let info =
            gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, config.width, config.height)
                .fps(gst::Fraction::new(fps, 1))
                .build()
                .map_err(|e| CardcastError::configuration(format!("Invalid frame layout: {e}")))?;
        let caps = info
            .to_caps()
            .map_err(|e| CardcastError::configuration(format!("Invalid frame caps: {e}")))?;
        let stride = usize::try_from(info.stride()[0])
            .map_err(|_| CardcastError::configuration("Negative row stride"))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("frames")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(false)
            .build();

        let convert = gst::ElementFactory::make("videoconvert").build().map_err(|e| {
            CardcastError::configuration(format!("Failed to create videoconvert: {e}"))
        })?;

        let element_name = encoder_element(config.codec);
        // deadline=1 selects libvpx realtime mode; keyframes are forced per frame
        // and keyframe-max-dist only bounds the gap if a request is missed.
        let encoder = gst::ElementFactory::make(element_name)
            .property("target-bitrate", bitrate)
            .property("deadline", 1i64)
            .property("keyframe-max-dist", fps.max(1))
            .build()
            .map_err(|e| {
                CardcastError::configuration(format!("Failed to create {element_name}: {e}"))
            })?;

        let appsink = gst_app::AppSink::builder().name("chunks").sync(false).build();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let timestamp_us = buffer.pts().map(|t| t.useconds()).unwrap_or(0);
                    let chunk_type = if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
                        ChunkType::Delta
                    } else {
                        ChunkType::Key
                    };
                    let chunk =
                        EncodedChunk::new(map.as_slice().to_vec(), timestamp_us, chunk_type);
                    emitted.fetch_add(1, Ordering::Relaxed);
                    // The adapter went away; stop the stream instead of buffering forever.
                    output.send(chunk).map_err(|_| gst::FlowError::Flushing)?;
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([appsrc.upcast_ref(), &convert, &encoder, appsink.upcast_ref()])
            .map_err(|e| CardcastError::configuration(format!("Failed to add elements: {e}")))?;
        gst::Element::link_many([appsrc.upcast_ref(), &convert, &encoder, appsink.upcast_ref()])
            .map_err(|e| {
                CardcastError::configuration(format!("Failed to link encoder pipeline: {e}"))
            })?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            CardcastError::configuration(format!("Failed to start {element_name} pipeline: {e:?}"))
        })?;

        Ok(Running {
            pipeline,
            appsrc,
            stride,
            frame_size: info.size(),
            eos_sent: false,
        })
    }
}

/// Take the first error message off the bus, if any.
fn pending_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
        gst::MessageView::Error(e) => Some(e.error().to_string()),
        _ => None,
    }
}

#[async_trait]
impl EncoderBackend for GstEncoderBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    async fn is_config_supported(&self, config: &EncoderConfig) -> bool {
        if let Err(e) = init_gstreamer() {
            tracing::warn!(error = %e, "GStreamer unavailable");
            return false;
        }
        if config.width == 0 || config.height == 0 || config.frame_rate == 0 {
            return false;
        }
        ["appsrc", "videoconvert", "appsink", encoder_element(config.codec)]
            .iter()
            .all(|name| gst::ElementFactory::find(name).is_some())
    }

    fn configure(&mut self, config: &EncoderConfig, output: ChunkSender) -> CardcastResult<()> {
        init_gstreamer()?;
        if self.running.is_some() {
            return Err(CardcastError::configuration("GStreamer encoder already configured"));
        }
        self.running = Some(Self::build_pipeline(config, output, self.emitted.clone())?);
        self.frame_duration = Some(gst::ClockTime::from_nseconds(
            1_000_000_000 / u64::from(config.frame_rate.max(1)),
        ));
        Ok(())
    }

    fn encode(&mut self, frame: Frame, key_frame: bool) -> CardcastResult<()> {
        let frame_duration = self.frame_duration;
        let running = self.running()?;
        if running.eos_sent {
            return Err(CardcastError::encode("Frame submitted after flush"));
        }
        if let Some(error) = pending_error(&running.pipeline) {
            return Err(CardcastError::encode(format!("Encoder pipeline error: {error}")));
        }

        let index = frame.index();
        let pts = gst::ClockTime::from_useconds(frame.timestamp_us());
        if key_frame {
            // The appsrc segment starts at zero, so running time equals PTS and
            // the encoder keys exactly this frame even if the event overtakes
            // buffers still queued in appsrc.
            let request = gst_video::DownstreamForceKeyUnitEvent::builder()
                .timestamp(pts)
                .stream_time(pts)
                .running_time(pts)
                .all_headers(true)
                .build();
            if !running.appsrc.send_event(request) {
                tracing::debug!(index, "Keyframe request was not handled");
            }
        }

        let raw = frame.into_strided_rows(running.stride)?;
        if raw.len() != running.frame_size {
            return Err(CardcastError::encode(format!(
                "Frame {index} has {} bytes, caps expect {}",
                raw.len(),
                running.frame_size
            )));
        }
        let mut buffer = gst::Buffer::from_mut_slice(raw);
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| CardcastError::encode("Frame buffer is not writable"))?;
            buffer_ref.set_pts(pts);
            buffer_ref.set_duration(frame_duration);
        }
        running
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| CardcastError::encode(format!("Failed to push frame {index}: {e:?}")))?;
        Ok(())
    }

    async fn flush(&mut self) -> CardcastResult<()> {
        let running = self.running()?;
        if running.eos_sent {
            return Ok(());
        }
        running
            .appsrc
            .end_of_stream()
            .map_err(|e| CardcastError::encode(format!("Failed to end stream: {e:?}")))?;
        running.eos_sent = true;

        let bus = running
            .pipeline
            .bus()
            .ok_or_else(|| CardcastError::encode("Encoder pipeline has no bus"))?;
        let outcome = tokio::task::spawn_blocking(move || {
            let timeout = gst::ClockTime::from_nseconds(FLUSH_TIMEOUT.as_nanos() as u64);
            let wanted = [gst::MessageType::Eos, gst::MessageType::Error];
            match bus.timed_pop_filtered(timeout, &wanted) {
                Some(message) => match message.view() {
                    gst::MessageView::Error(e) => {
                        Err(format!("Encoder pipeline error: {}", e.error()))
                    }
                    _ => Ok(()),
                },
                None => Err(format!("End of stream not reached within {FLUSH_TIMEOUT:?}")),
            }
        })
        .await
        .map_err(|e| CardcastError::encode(format!("Flush task failed: {e}")))?;

        outcome.map_err(CardcastError::encode)?;
        tracing::debug!(
            chunks = self.emitted.load(Ordering::Relaxed),
            "GStreamer encoder drained"
        );
        Ok(())
    }

    fn close(&mut self) {
        if let Some(running) = self.running.take() {
            if let Err(e) = running.pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = ?e, "Failed to stop encoder pipeline");
            }
        }
    }
}

impl Drop for GstEncoderBackend {
    fn drop(&mut self) {
        self.close();
    }
}

//! Frame compositor: draws clips onto a fixed-size surface.
//!
//! The surface is sized once per run. Each decoded frame is scaled to
//! cover the surface and centre-cropped, the optional "Day N" badge is
//! drawn on top, and the result is pushed to the encoder along with the
//! bus audio for that frame.

use std::time::Duration;

use dayreel_common::{CancelToken, DrawCadence, FrameClock, ReelResult};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tokio::time::{Interval, MissedTickBehavior};

use crate::decoder::{DecodedClip, VideoFrame};
use crate::encoder::Encoder;
use crate::mixer::{BusTap, MixingSession};
use crate::overlay::OverlayRenderer;

/// What drawing one clip produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipDrawReport {
    /// 1-based position in the request.
    pub clip_index: usize,
    pub frames_drawn: u64,
    /// Frames that carried the badge.
    pub badge_frames: u64,
    /// Whether the clip's audio reached the bus.
    pub audio_routed: bool,
    pub drawn_secs: f64,
}

/// The run's RGBA drawing surface.
#[derive(Debug, Clone)]
pub struct Surface {
    image: RgbaImage,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Scale `frame` to cover the surface and centre-crop the overflow.
    pub fn draw_cover(&mut self, frame: &RgbaImage) {
        let (sw, sh) = self.image.dimensions();
        let (fw, fh) = frame.dimensions();
        if fw == 0 || fh == 0 || sw == 0 || sh == 0 {
            return;
        }
        if (fw, fh) == (sw, sh) {
            self.image.copy_from_slice(frame.as_raw());
            return;
        }

        let scale = (sw as f64 / fw as f64).max(sh as f64 / fh as f64);
        let scaled_w = ((fw as f64 * scale).ceil() as u32).max(sw);
        let scaled_h = ((fh as f64 * scale).ceil() as u32).max(sh);
        let scaled = imageops::resize(frame, scaled_w, scaled_h, FilterType::Triangle);
        let x = (scaled_w - sw) / 2;
        let y = (scaled_h - sh) / 2;
        let cropped = imageops::crop_imm(&scaled, x, y, sw, sh).to_image();
        self.image.copy_from_slice(cropped.as_raw());
    }
}

/// Paces draw ticks.
enum DrawTicker {
    Realtime(Interval),
    Immediate,
}

impl DrawTicker {
    fn new(cadence: DrawCadence, clock: &FrameClock) -> Self {
        match cadence {
            DrawCadence::Realtime => {
                let period = Duration::from_secs_f64(clock.frame_interval_secs());
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Self::Realtime(interval)
            }
            DrawCadence::Immediate => Self::Immediate,
        }
    }

    async fn tick(&mut self) {
        match self {
            Self::Realtime(interval) => {
                interval.tick().await;
            }
            Self::Immediate => tokio::task::yield_now().await,
        }
    }
}

/// Draws clips onto the run's surface and feeds the encoder.
pub struct FrameCompositor {
    surface: Surface,
    overlay: OverlayRenderer,
    cadence: DrawCadence,
    clock: FrameClock,
    output_frames: u64,
}

impl FrameCompositor {
    pub fn new(
        width: u32,
        height: u32,
        overlay: OverlayRenderer,
        cadence: DrawCadence,
        clock: FrameClock,
    ) -> Self {
        Self {
            surface: Surface::new(width, height),
            overlay,
            cadence,
            clock,
            output_frames: 0,
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Frames pushed to the encoder across all clips.
    pub fn output_frames(&self) -> u64 {
        self.output_frames
    }

    /// Draw one frame and, if given, its badge. Returns whether a badge
    /// was drawn.
    pub fn compose(&mut self, frame: &VideoFrame, badge: Option<&str>) -> bool {
        self.surface.draw_cover(&frame.image);
        match badge {
            Some(text) => {
                self.overlay.draw_badge(self.surface.image_mut(), text);
                true
            }
            None => false,
        }
    }

    /// Play `clip` from the start and draw every frame until end of
    /// stream.
    ///
    /// While the clip draws, its audio source is attached to `mixer` (if
    /// any); it is detached again on every exit path. The cancellation
    /// token is checked between draw ticks.
    pub async fn draw_clip(
        &mut self,
        clip_index: usize,
        clip: &mut dyn DecodedClip,
        label: Option<u32>,
        mut mixer: Option<&mut MixingSession>,
        encoder: &mut dyn Encoder,
        cancel: &CancelToken,
    ) -> ReelResult<ClipDrawReport> {
        clip.play_from_start().await?;

        let mut tap = None;
        if let Some(mixer) = mixer.as_deref_mut() {
            match clip.audio_source() {
                Some(source) => match mixer.attach(source) {
                    Ok(t) => tap = Some(t),
                    Err(e) => tracing::warn!(
                        clip_index,
                        error = %e,
                        "Clip audio not routed; contributing silence"
                    ),
                },
                None => tracing::debug!(clip_index, "Clip has no audio track"),
            }
        }

        let mut report = ClipDrawReport {
            clip_index,
            frames_drawn: 0,
            badge_frames: 0,
            audio_routed: tap.is_some(),
            drawn_secs: 0.0,
        };

        let badge = label.map(|day| format!("Day {day}"));
        let result = self
            .pump_frames(
                clip,
                badge.as_deref(),
                mixer.as_deref_mut(),
                tap.as_ref(),
                encoder,
                cancel,
                &mut report,
            )
            .await;

        if let (Some(mixer), Some(tap)) = (mixer.as_deref_mut(), tap) {
            if let Some(source) = clip.audio_source() {
                mixer.detach(tap, source);
            }
        }

        result?;
        report.drawn_secs = self.clock.frames_to_secs(report.frames_drawn);
        tracing::debug!(
            clip_index,
            frames = report.frames_drawn,
            badge_frames = report.badge_frames,
            audio_routed = report.audio_routed,
            "Clip drawn"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump_frames(
        &mut self,
        clip: &mut dyn DecodedClip,
        badge: Option<&str>,
        mut mixer: Option<&mut MixingSession>,
        tap: Option<&BusTap>,
        encoder: &mut dyn Encoder,
        cancel: &CancelToken,
        report: &mut ClipDrawReport,
    ) -> ReelResult<()> {
        let mut ticker = DrawTicker::new(self.cadence, &self.clock);
        loop {
            ticker.tick().await;
            cancel.check()?;

            let Some(frame) = clip.next_frame().await? else {
                break;
            };

            if self.compose(&frame.video, badge) {
                report.badge_frames += 1;
            }
            encoder.push_video(self.surface.image()).await?;

            if let Some(mixer) = mixer.as_deref_mut() {
                let samples = mixer.mix(tap, frame.audio, self.output_frames);
                encoder.push_audio(&samples).await?;
            }

            self.output_frames += 1;
            report.frames_drawn += 1;
        }
        Ok(())
    }
}

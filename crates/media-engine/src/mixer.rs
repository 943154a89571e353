//! Audio routing into a per-run mixing bus.
//!
//! Each decoded clip owns an [`AudioSource`] that starts muted. A run
//! owns one [`MixingSession`]; while a clip is the active draw target its
//! source is attached to the session's bus, and it is detached when the
//! clip finishes. Only one source feeds the bus at a time, and a source
//! is unmuted only by the same step that connects it to the bus, so clip
//! audio never reaches the speakers.

use std::sync::atomic::{AtomicU64, Ordering};

use dayreel_common::{FrameClock, ReelError, ReelResult};

use crate::decoder::AudioChunk;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where a source's audio currently goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRoute {
    /// Decoded but inaudible.
    Muted,
    /// Playing through the default output device.
    Speakers,
    /// Feeding the mixing bus with this session id.
    Bus(u64),
}

/// Audio output handle of one decoded clip.
#[derive(Debug)]
pub struct AudioSource {
    id: u64,
    route: AudioRoute,
}

impl AudioSource {
    /// A new source in the muted route.
    pub fn muted() -> Self {
        Self {
            id: next_id(),
            route: AudioRoute::Muted,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> AudioRoute {
        self.route
    }

    /// Send this source to the default output device, e.g. for preview
    /// playback. A speaker-routed source cannot join a bus.
    pub fn route_to_speakers(&mut self) {
        self.route = AudioRoute::Speakers;
    }

    /// Return the source to the muted route.
    pub fn mute(&mut self) {
        self.route = AudioRoute::Muted;
    }
}

/// Proof that a source is attached to a session's bus.
#[derive(Debug, PartialEq, Eq)]
pub struct BusTap {
    session_id: u64,
    source_id: u64,
}

/// Per-run mixing bus with a fixed sample format.
#[derive(Debug)]
pub struct MixingSession {
    id: u64,
    clock: FrameClock,
    attached: Option<u64>,
    mixed_frames: u64,
    silent_frames: u64,
}

impl MixingSession {
    /// Open a bus running at `clock`'s sample rate, stereo.
    pub fn open(clock: FrameClock) -> Self {
        let id = next_id();
        tracing::debug!(
            session_id = id,
            sample_rate = clock.sample_rate(),
            "Mixing session opened"
        );
        Self {
            id,
            clock,
            attached: None,
            mixed_frames: 0,
            silent_frames: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    /// Id of the source currently feeding the bus.
    pub fn attached_source(&self) -> Option<u64> {
        self.attached
    }

    /// Frames that carried clip audio.
    pub fn mixed_frames(&self) -> u64 {
        self.mixed_frames
    }

    /// Frames filled with silence.
    pub fn silent_frames(&self) -> u64 {
        self.silent_frames
    }

    /// Connect `source` to this bus.
    ///
    /// Fails if the bus already has a source, or if the source is routed
    /// to the speakers or to any bus. On success the source's route is
    /// switched to this bus in the same step.
    pub fn attach(&mut self, source: &mut AudioSource) -> ReelResult<BusTap> {
        if let Some(current) = self.attached {
            return Err(ReelError::audio(format!(
                "bus {} already carries source {current}",
                self.id
            )));
        }
        match source.route {
            AudioRoute::Muted => {}
            AudioRoute::Speakers => {
                return Err(ReelError::audio(format!(
                    "source {} is routed to speakers",
                    source.id
                )))
            }
            AudioRoute::Bus(other) => {
                return Err(ReelError::audio(format!(
                    "source {} is already attached to bus {other}",
                    source.id
                )))
            }
        }

        source.route = AudioRoute::Bus(self.id);
        self.attached = Some(source.id);
        tracing::debug!(session_id = self.id, source_id = source.id, "Audio source attached");
        Ok(BusTap {
            session_id: self.id,
            source_id: source.id,
        })
    }

    /// Disconnect the source behind `tap` and mute it again.
    pub fn detach(&mut self, tap: BusTap, source: &mut AudioSource) {
        if tap.session_id != self.id {
            return;
        }
        if source.id == tap.source_id && source.route == AudioRoute::Bus(self.id) {
            source.route = AudioRoute::Muted;
        }
        if self.attached == Some(tap.source_id) {
            self.attached = None;
        }
        tracing::debug!(session_id = self.id, source_id = tap.source_id, "Audio source detached");
    }

    /// Produce the bus samples for output frame `frame_index`.
    ///
    /// Audio from an attached source is padded or truncated to the exact
    /// frame length; without a live tap the frame is silence.
    pub fn mix(
        &mut self,
        tap: Option<&BusTap>,
        chunk: Option<AudioChunk>,
        frame_index: u64,
    ) -> Vec<f32> {
        let len = self.clock.interleaved_len_for_frame(frame_index);
        let live = tap.is_some_and(|t| t.session_id == self.id && self.attached == Some(t.source_id));

        match (live, chunk) {
            (true, Some(chunk)) => {
                let mut samples = chunk.samples;
                samples.resize(len, 0.0);
                for sample in &mut samples {
                    *sample = sample.clamp(-1.0, 1.0);
                }
                self.mixed_frames += 1;
                samples
            }
            _ => {
                self.silent_frames += 1;
                vec![0.0; len]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> FrameClock {
        FrameClock::new(30, 48000)
    }

    #[test]
    fn test_attach_unmutes_only_into_bus() {
        let mut session = MixingSession::open(clock());
        let mut source = AudioSource::muted();
        assert_eq!(source.route(), AudioRoute::Muted);

        let tap = session.attach(&mut source).unwrap();
        assert_eq!(source.route(), AudioRoute::Bus(session.id()));
        assert_eq!(session.attached_source(), Some(source.id()));

        session.detach(tap, &mut source);
        assert_eq!(source.route(), AudioRoute::Muted);
        assert_eq!(session.attached_source(), None);
    }

    #[test]
    fn test_speaker_routed_source_is_refused() {
        let mut session = MixingSession::open(clock());
        let mut source = AudioSource::muted();
        source.route_to_speakers();
        let err = session.attach(&mut source).unwrap_err();
        assert_eq!(err.phase(), "audio");
        assert_eq!(source.route(), AudioRoute::Speakers);
    }

    #[test]
    fn test_source_on_another_bus_is_refused() {
        let mut first = MixingSession::open(clock());
        let mut second = MixingSession::open(clock());
        let mut source = AudioSource::muted();
        let _tap = first.attach(&mut source).unwrap();
        assert!(second.attach(&mut source).is_err());
        assert_eq!(source.route(), AudioRoute::Bus(first.id()));
    }

    #[test]
    fn test_bus_takes_one_source_at_a_time() {
        let mut session = MixingSession::open(clock());
        let mut a = AudioSource::muted();
        let mut b = AudioSource::muted();
        let tap = session.attach(&mut a).unwrap();
        assert!(session.attach(&mut b).is_err());
        assert_eq!(b.route(), AudioRoute::Muted);
        session.detach(tap, &mut a);
        assert!(session.attach(&mut b).is_ok());
    }

    #[test]
    fn test_mix_pads_and_silences() {
        let mut session = MixingSession::open(clock());
        let mut source = AudioSource::muted();
        let tap = session.attach(&mut source).unwrap();

        let mixed = session.mix(Some(&tap), Some(AudioChunk { samples: vec![2.0; 10] }), 0);
        assert_eq!(mixed.len(), 3200);
        assert_eq!(mixed[0], 1.0);
        assert_eq!(mixed[10], 0.0);

        let silent = session.mix(None, Some(AudioChunk { samples: vec![0.5; 3200] }), 1);
        assert!(silent.iter().all(|s| *s == 0.0));
        assert_eq!(session.mixed_frames(), 1);
        assert_eq!(session.silent_frames(), 1);
    }
}

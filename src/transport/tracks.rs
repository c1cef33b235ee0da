//! Track bindings for the live transport

use super::{MediaKind, TransportId};

/// Association between a media kind and its live stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackBinding {
    pub kind: MediaKind,
    /// Opaque stream handle reported by the transport
    pub stream: String,
    /// Transport instance that owns the stream
    pub transport: TransportId,
    /// The stream has started playing
    pub playing: bool,
}

/// At most one binding per media kind
#[derive(Debug, Default)]
pub struct Bindings {
    audio: Option<TrackBinding>,
    video: Option<TrackBinding>,
}

impl Bindings {
    /// Install a binding, returning the one it replaced
    pub fn bind(&mut self, binding: TrackBinding) -> Option<TrackBinding> {
        self.slot_mut(binding.kind).replace(binding)
    }

    /// Mark a bound track as playing
    ///
    /// Returns false when no track of that kind is bound.
    pub fn mark_playing(&mut self, kind: MediaKind) -> bool {
        match self.slot_mut(kind) {
            Some(binding) => {
                binding.playing = true;
                true
            }
            None => false,
        }
    }

    /// Binding for a kind
    #[must_use]
    pub const fn get(&self, kind: MediaKind) -> Option<&TrackBinding> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    /// Whether the required tracks are playing
    #[must_use]
    pub fn is_ready(&self, require_video: bool) -> bool {
        let playing = |b: Option<&TrackBinding>| b.is_some_and(|b| b.playing);
        playing(self.audio.as_ref()) && (!require_video || playing(self.video.as_ref()))
    }

    /// Drop all bindings
    pub fn clear(&mut self) {
        self.audio = None;
        self.video = None;
    }

    /// Whether nothing is bound
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    const fn slot_mut(&mut self, kind: MediaKind) -> &mut Option<TrackBinding> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(kind: MediaKind, stream: &str) -> TrackBinding {
        TrackBinding {
            kind,
            stream: stream.to_string(),
            transport: TransportId(1),
            playing: false,
        }
    }

    #[test]
    fn new_binding_replaces_prior() {
        let mut bindings = Bindings::default();
        assert!(bindings.bind(binding(MediaKind::Audio, "a1")).is_none());

        let replaced = bindings.bind(binding(MediaKind::Audio, "a2")).unwrap();
        assert_eq!(replaced.stream, "a1");
        assert_eq!(bindings.get(MediaKind::Audio).unwrap().stream, "a2");
    }

    #[test]
    fn readiness_requires_both_by_default() {
        let mut bindings = Bindings::default();
        bindings.bind(binding(MediaKind::Audio, "a"));
        bindings.bind(binding(MediaKind::Video, "v"));
        bindings.mark_playing(MediaKind::Audio);

        assert!(!bindings.is_ready(true));
        assert!(bindings.is_ready(false));

        bindings.mark_playing(MediaKind::Video);
        assert!(bindings.is_ready(true));
    }

    #[test]
    fn playing_without_binding_is_ignored() {
        let mut bindings = Bindings::default();
        assert!(!bindings.mark_playing(MediaKind::Video));
        assert!(!bindings.is_ready(false));
    }

    #[test]
    fn clear_releases_everything() {
        let mut bindings = Bindings::default();
        bindings.bind(binding(MediaKind::Audio, "a"));
        bindings.bind(binding(MediaKind::Video, "v"));
        bindings.clear();

        assert!(bindings.is_empty());
        assert!(bindings.get(MediaKind::Audio).is_none());
    }
}

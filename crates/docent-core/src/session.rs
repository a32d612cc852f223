//! Session state machine.
//!
//! ```text
//! Welcome ──Start──▶ Idle ──Capture──▶ Scanning ──Recognized──▶ Found
//!    ▲                ▲ ◀──not found / not cataloged──┘           │
//!    │                └───────────────Close──────────────────────┘
//!    └──Recover── Error ◀──CameraFailed── (any state)
//! ```
//!
//! [`Session::handle`] is a pure transition function. It never touches the
//! camera or the network; it returns [`Effect`]s for the runtime to perform
//! and the runtime feeds their completions back as events.

use crate::catalog::Catalog;
use crate::types::{Artifact, Verdict};
use std::fmt;

/// Soft, dismissible message shown over the live view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The model recognized nothing from the catalog.
    NothingRecognized,
    /// The model named an artifact the catalog does not hold.
    NotCataloged,
    /// The frame could not be captured or encoded.
    CaptureFailed,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Notice::NothingRecognized => {
                "No museum object was identified. Try moving closer or improving the lighting."
            }
            Notice::NotCataloged => "Object recognized but not found in the catalog.",
            Notice::CaptureFailed => "Could not capture an image. Please try again.",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Welcome,
    Idle { notice: Option<Notice> },
    /// A capture is in flight, tagged with its epoch.
    Scanning { epoch: u64 },
    Found { artifact: Artifact },
    /// Camera acquisition failed. Fatal until recovered.
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Welcome,
    Idle,
    Scanning,
    Found,
    Error,
}

impl State {
    pub fn phase(&self) -> Phase {
        match self {
            State::Welcome => Phase::Welcome,
            State::Idle { .. } => Phase::Idle,
            State::Scanning { .. } => Phase::Scanning,
            State::Found { .. } => Phase::Found,
            State::Error { .. } => Phase::Error,
        }
    }

    /// Whether this state keeps the camera stream open.
    pub fn needs_camera(&self) -> bool {
        matches!(
            self,
            State::Idle { .. } | State::Scanning { .. } | State::Found { .. }
        )
    }
}

/// Inputs to the state machine: user actions and async completions.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Leave the welcome screen.
    Start,
    /// Acquisition finished; the stream is live.
    CameraReady { width: u32, height: u32 },
    /// Acquisition failed.
    CameraFailed { reason: String },
    /// Take a snapshot and identify it.
    Capture,
    Recognized { epoch: u64, verdict: Verdict },
    SnapshotFailed { epoch: u64, reason: String },
    /// Close the detail view.
    Close,
    DismissNotice,
    /// Leave the fatal error screen.
    Recover,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    AcquireCamera,
    /// Idempotent; safe when nothing is held.
    ReleaseCamera,
    CaptureAndIdentify { epoch: u64 },
}

/// One run of the guide, from launch to close.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    state: State,
    camera_live: bool,
    /// Live frame size reported by the camera.
    frame_size: Option<(u32, u32)>,
    epoch: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: State::Welcome,
            camera_live: false,
            frame_size: None,
            epoch: 0,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn camera_live(&self) -> bool {
        self.camera_live
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.frame_size
    }

    /// The resolved artifact; present only while Found.
    pub fn current_artifact(&self) -> Option<&Artifact> {
        match &self.state {
            State::Found { artifact } => Some(artifact),
            _ => None,
        }
    }

    /// The pending message, soft or fatal.
    pub fn message(&self) -> Option<String> {
        match &self.state {
            State::Idle {
                notice: Some(notice),
            } => Some(notice.to_string()),
            State::Error { message } => Some(message.clone()),
            _ => None,
        }
    }

    /// Whether a capture would be accepted right now.
    pub fn can_capture(&self) -> bool {
        matches!(self.state, State::Idle { .. }) && self.camera_live
    }

    /// Apply one event. Events that do not apply to the current state are inert.
    pub fn handle(&mut self, event: Event, catalog: &Catalog) -> Vec<Effect> {
        let from = self.phase();
        let effects = self.transition(event, catalog);
        if self.phase() != from {
            tracing::debug!(?from, to = ?self.phase(), ?effects, "session transition");
        }
        effects
    }

    fn transition(&mut self, event: Event, catalog: &Catalog) -> Vec<Effect> {
        match (&self.state, event) {
            (State::Welcome, Event::Start) => {
                self.state = State::Idle { notice: None };
                vec![Effect::AcquireCamera]
            }

            (state, Event::CameraReady { width, height }) => {
                if state.needs_camera() {
                    self.camera_live = true;
                    self.frame_size = Some((width, height));
                    Vec::new()
                } else {
                    // Arrived after the session moved on.
                    vec![Effect::ReleaseCamera]
                }
            }

            (_, Event::CameraFailed { reason }) => {
                tracing::warn!(%reason, "camera unavailable");
                self.camera_live = false;
                self.frame_size = None;
                self.state = State::Error {
                    message: format!(
                        "Could not access the camera ({reason}). Allow camera access to use the guide."
                    ),
                };
                vec![Effect::ReleaseCamera]
            }

            (State::Idle { .. }, Event::Capture) if self.camera_live => {
                self.epoch += 1;
                let epoch = self.epoch;
                self.state = State::Scanning { epoch };
                vec![Effect::CaptureAndIdentify { epoch }]
            }

            (State::Scanning { epoch: current }, Event::Recognized { epoch, verdict })
                if *current == epoch =>
            {
                self.state = resolve(verdict, catalog);
                Vec::new()
            }

            (State::Scanning { epoch: current }, Event::SnapshotFailed { epoch, reason })
                if *current == epoch =>
            {
                tracing::warn!(%reason, "snapshot failed");
                self.state = State::Idle {
                    notice: Some(Notice::CaptureFailed),
                };
                Vec::new()
            }

            (_, Event::Recognized { epoch, .. }) | (_, Event::SnapshotFailed { epoch, .. }) => {
                tracing::debug!(epoch, current = self.epoch, "discarding stale result");
                Vec::new()
            }

            (State::Found { .. }, Event::Close) => {
                self.state = State::Idle { notice: None };
                Vec::new()
            }

            (State::Idle { notice: Some(_) }, Event::DismissNotice) => {
                self.state = State::Idle { notice: None };
                Vec::new()
            }

            (State::Error { .. }, Event::Recover) => {
                self.state = State::Welcome;
                vec![Effect::ReleaseCamera]
            }

            (_, event) => {
                tracing::trace!(?event, phase = ?self.phase(), "event ignored");
                Vec::new()
            }
        }
    }
}

fn resolve(verdict: Verdict, catalog: &Catalog) -> State {
    match (verdict.found, verdict.artifact_id) {
        (true, Some(id)) => match catalog.lookup(&id) {
            Some(artifact) => State::Found {
                artifact: artifact.clone(),
            },
            None => State::Idle {
                notice: Some(Notice::NotCataloged),
            },
        },
        (true, None) => State::Idle {
            notice: Some(Notice::NotCataloged),
        },
        (false, _) => State::Idle {
            notice: Some(Notice::NothingRecognized),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> &'static Catalog {
        Catalog::builtin()
    }

    /// A session in Idle with a live camera.
    fn live_idle() -> Session {
        let mut s = Session::new();
        assert_eq!(s.handle(Event::Start, catalog()), vec![Effect::AcquireCamera]);
        s.handle(
            Event::CameraReady {
                width: 1280,
                height: 720,
            },
            catalog(),
        );
        s
    }

    fn scanning() -> (Session, u64) {
        let mut s = live_idle();
        let effects = s.handle(Event::Capture, catalog());
        let Effect::CaptureAndIdentify { epoch } = effects[0] else {
            panic!("expected capture effect, got {effects:?}");
        };
        (s, epoch)
    }

    #[test]
    fn test_starts_in_welcome_without_camera() {
        let s = Session::new();
        assert_eq!(s.phase(), Phase::Welcome);
        assert!(!s.camera_live());
        assert!(!s.state().needs_camera());
    }

    #[test]
    fn test_capture_from_idle_scans() {
        let (s, epoch) = scanning();
        assert_eq!(s.phase(), Phase::Scanning);
        assert_eq!(epoch, 1);
        assert_eq!(s.frame_size(), Some((1280, 720)));
    }

    #[test]
    fn test_capture_before_camera_ready_is_inert() {
        let mut s = Session::new();
        s.handle(Event::Start, catalog());
        assert!(!s.can_capture());
        assert!(s.handle(Event::Capture, catalog()).is_empty());
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn test_scanning_rejects_second_capture() {
        let (mut s, epoch) = scanning();
        assert!(s.handle(Event::Capture, catalog()).is_empty());
        assert_eq!(s.state(), &State::Scanning { epoch });
    }

    #[test]
    fn test_found_resolves_artifact() {
        let (mut s, epoch) = scanning();
        s.handle(
            Event::Recognized {
                epoch,
                verdict: Verdict::matched("campana-1920", 0.9),
            },
            catalog(),
        );
        assert_eq!(s.phase(), Phase::Found);
        assert_eq!(s.current_artifact().unwrap().id, "campana-1920");
        assert!(s.message().is_none());
        assert!(s.camera_live());
    }

    #[test]
    fn test_unknown_artifact_returns_to_idle_with_message() {
        let (mut s, epoch) = scanning();
        s.handle(
            Event::Recognized {
                epoch,
                verdict: Verdict::matched("nonexistent-id", 0.9),
            },
            catalog(),
        );
        assert_eq!(
            s.state(),
            &State::Idle {
                notice: Some(Notice::NotCataloged)
            }
        );
        assert!(s.message().is_some());
        assert!(s.current_artifact().is_none());
    }

    #[test]
    fn test_not_found_returns_to_idle_with_message() {
        let (mut s, epoch) = scanning();
        s.handle(
            Event::Recognized {
                epoch,
                verdict: Verdict::not_found(),
            },
            catalog(),
        );
        assert_eq!(
            s.state(),
            &State::Idle {
                notice: Some(Notice::NothingRecognized)
            }
        );
        assert!(s.message().is_some());
    }

    #[test]
    fn test_snapshot_failure_is_soft() {
        let (mut s, epoch) = scanning();
        s.handle(
            Event::SnapshotFailed {
                epoch,
                reason: "dequeue failed".into(),
            },
            catalog(),
        );
        assert_eq!(
            s.state(),
            &State::Idle {
                notice: Some(Notice::CaptureFailed)
            }
        );
        assert!(s.can_capture());
    }

    #[test]
    fn test_close_clears_artifact_and_message() {
        let (mut s, epoch) = scanning();
        s.handle(
            Event::Recognized {
                epoch,
                verdict: Verdict::matched("globo-terraqueo", 0.8),
            },
            catalog(),
        );
        assert!(s.handle(Event::Close, catalog()).is_empty());
        assert_eq!(s.state(), &State::Idle { notice: None });
        assert!(s.current_artifact().is_none());
        assert!(s.message().is_none());
    }

    #[test]
    fn test_new_capture_clears_previous_notice() {
        let (mut s, epoch) = scanning();
        s.handle(
            Event::Recognized {
                epoch,
                verdict: Verdict::not_found(),
            },
            catalog(),
        );
        s.handle(Event::Capture, catalog());
        assert_eq!(s.state(), &State::Scanning { epoch: epoch + 1 });
        assert!(s.message().is_none());
    }

    #[test]
    fn test_dismiss_notice() {
        let (mut s, epoch) = scanning();
        s.handle(
            Event::Recognized {
                epoch,
                verdict: Verdict::not_found(),
            },
            catalog(),
        );
        s.handle(Event::DismissNotice, catalog());
        assert_eq!(s.state(), &State::Idle { notice: None });
    }

    #[test]
    fn test_stale_result_discarded() {
        let (mut s, first) = scanning();
        // Camera drops mid-scan, user recovers and starts again.
        s.handle(
            Event::CameraFailed {
                reason: "unplugged".into(),
            },
            catalog(),
        );
        s.handle(Event::Recover, catalog());
        s.handle(Event::Start, catalog());
        s.handle(
            Event::CameraReady {
                width: 640,
                height: 480,
            },
            catalog(),
        );
        s.handle(Event::Capture, catalog());
        let second = first + 1;
        assert_eq!(s.state(), &State::Scanning { epoch: second });

        s.handle(
            Event::Recognized {
                epoch: first,
                verdict: Verdict::matched("campana-1920", 1.0),
            },
            catalog(),
        );
        assert_eq!(s.state(), &State::Scanning { epoch: second });

        s.handle(
            Event::Recognized {
                epoch: second,
                verdict: Verdict::matched("pupitre-antiguo", 0.7),
            },
            catalog(),
        );
        assert_eq!(s.current_artifact().unwrap().id, "pupitre-antiguo");
    }

    #[test]
    fn test_result_outside_scanning_ignored() {
        let mut s = live_idle();
        s.handle(
            Event::Recognized {
                epoch: 0,
                verdict: Verdict::matched("campana-1920", 1.0),
            },
            catalog(),
        );
        assert_eq!(s.state(), &State::Idle { notice: None });
    }

    #[test]
    fn test_camera_failure_is_fatal_and_releases() {
        let mut s = Session::new();
        s.handle(Event::Start, catalog());
        let effects = s.handle(
            Event::CameraFailed {
                reason: "permission denied".into(),
            },
            catalog(),
        );
        assert_eq!(effects, vec![Effect::ReleaseCamera]);
        assert_eq!(s.phase(), Phase::Error);
        assert!(!s.camera_live());
        assert!(s.message().unwrap().contains("permission denied"));
        // Capture is inert in Error.
        assert!(s.handle(Event::Capture, catalog()).is_empty());
    }

    #[test]
    fn test_recover_returns_to_welcome() {
        let mut s = Session::new();
        s.handle(Event::Start, catalog());
        s.handle(
            Event::CameraFailed {
                reason: "busy".into(),
            },
            catalog(),
        );
        let effects = s.handle(Event::Recover, catalog());
        assert_eq!(effects, vec![Effect::ReleaseCamera]);
        assert_eq!(s.phase(), Phase::Welcome);
        assert!(s.message().is_none());
        assert_eq!(s.handle(Event::Start, catalog()), vec![Effect::AcquireCamera]);
    }

    #[test]
    fn test_late_camera_ready_is_released() {
        let mut s = Session::new();
        let effects = s.handle(
            Event::CameraReady {
                width: 1280,
                height: 720,
            },
            catalog(),
        );
        assert_eq!(effects, vec![Effect::ReleaseCamera]);
        assert!(!s.camera_live());
    }

    #[test]
    fn test_inert_events() {
        let mut s = Session::new();
        for event in [Event::Capture, Event::Close, Event::DismissNotice, Event::Recover] {
            assert!(s.handle(event, catalog()).is_empty());
            assert_eq!(s.phase(), Phase::Welcome);
        }
        let mut s = live_idle();
        assert!(s.handle(Event::Start, catalog()).is_empty());
        assert!(s.handle(Event::Close, catalog()).is_empty());
        assert_eq!(s.phase(), Phase::Idle);
    }
}

//! Application controller runtime.
//!
//! Drives the pure [`Session`] state machine: one event at a time from a
//! single queue, effects performed after each transition, and every new
//! session published on a `watch` channel for the presentation layer.
//! Camera acquisition and recognition run as spawned tasks that post their
//! completions back onto the same queue.

use crate::engine::CameraHandle;
use docent_core::{Catalog, Effect, Event, Recognizer, Session};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Inputs to the controller loop.
#[derive(Debug)]
enum Input {
    Event(Event),
    Shutdown,
}

/// Handle used by the presentation layer and input sources.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Input>,
    view: watch::Receiver<Session>,
}

impl ControllerHandle {
    /// Queue a user event. Returns false once the controller has stopped.
    pub async fn send(&self, event: Event) -> bool {
        self.tx.send(Input::Event(event)).await.is_ok()
    }

    /// Ask the controller to release the camera and stop.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Input::Shutdown).await;
    }

    /// Subscribe to session changes.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.view.clone()
    }
}

struct Controller {
    session: Session,
    catalog: Arc<Catalog>,
    camera: CameraHandle,
    recognizer: Arc<dyn Recognizer>,
    /// Completion path for spawned tasks.
    events: mpsc::Sender<Input>,
    view: watch::Sender<Session>,
}

/// Start the controller loop on the current runtime.
pub fn spawn(
    catalog: Arc<Catalog>,
    camera: CameraHandle,
    recognizer: Arc<dyn Recognizer>,
) -> (ControllerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(32);
    let session = Session::new();
    let (view_tx, view_rx) = watch::channel(session.clone());

    let controller = Controller {
        session,
        catalog,
        camera,
        recognizer,
        events: tx.clone(),
        view: view_tx,
    };
    let task = tokio::spawn(controller.run(rx));

    (ControllerHandle { tx, view: view_rx }, task)
}

impl Controller {
    async fn run(mut self, mut rx: mpsc::Receiver<Input>) {
        tracing::info!("controller started");
        while let Some(input) = rx.recv().await {
            let event = match input {
                Input::Event(event) => event,
                Input::Shutdown => break,
            };

            let effects = self.session.handle(event, &self.catalog);
            self.view.send_if_modified(|current| {
                if *current == self.session {
                    false
                } else {
                    *current = self.session.clone();
                    true
                }
            });

            for effect in effects {
                self.perform(effect).await;
            }
        }

        if let Err(e) = self.camera.release().await {
            tracing::warn!(error = %e, "camera release on shutdown failed");
        }
        tracing::info!("controller stopped");
    }

    async fn perform(&self, effect: Effect) {
        match effect {
            Effect::AcquireCamera => {
                let pending = self.camera.submit_acquire().await;
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = match pending {
                        Ok(pending) => pending.wait().await,
                        Err(e) => Err(e),
                    };
                    let event = match result {
                        Ok((width, height)) => Event::CameraReady { width, height },
                        Err(e) => Event::CameraFailed {
                            reason: e.to_string(),
                        },
                    };
                    let _ = events.send(Input::Event(event)).await;
                });
            }
            Effect::ReleaseCamera => {
                if let Err(e) = self.camera.release().await {
                    tracing::warn!(error = %e, "camera release failed");
                }
            }
            Effect::CaptureAndIdentify { epoch } => {
                let pending = self.camera.submit_snapshot().await;
                let events = self.events.clone();
                let recognizer = self.recognizer.clone();
                tokio::spawn(async move {
                    let snapshot = match pending {
                        Ok(pending) => pending.wait().await,
                        Err(e) => Err(e),
                    };
                    let event = match snapshot {
                        Ok(image) => Event::Recognized {
                            epoch,
                            verdict: recognizer.identify(&image).await,
                        },
                        Err(e) => Event::SnapshotFailed {
                            epoch,
                            reason: e.to_string(),
                        },
                    };
                    let _ = events.send(Input::Event(event)).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::FakeCamera;
    use async_trait::async_trait;
    use docent_core::{EncodedImage, Phase, State, Verdict};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Returns queued verdicts in order; optionally blocks until released.
    #[derive(Default)]
    struct FakeRecognizer {
        verdicts: Mutex<Vec<Verdict>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeRecognizer {
        fn with(verdicts: Vec<Verdict>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Recognizer for FakeRecognizer {
        async fn identify(&self, _image: &EncodedImage) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let mut queued = self.verdicts.lock().unwrap();
            if queued.is_empty() {
                Verdict::not_found()
            } else {
                queued.remove(0)
            }
        }
    }

    struct Harness {
        handle: ControllerHandle,
        task: JoinHandle<()>,
        camera: FakeCamera,
        recognizer: Arc<FakeRecognizer>,
    }

    fn harness(recognizer: FakeRecognizer) -> Harness {
        let camera = FakeCamera::default();
        let recognizer = Arc::new(recognizer);
        let (handle, task) = spawn(
            Arc::new(Catalog::builtin().clone()),
            camera.spawn(),
            recognizer.clone(),
        );
        Harness {
            handle,
            task,
            camera,
            recognizer,
        }
    }

    async fn wait_until(handle: &ControllerHandle, pred: impl FnMut(&Session) -> bool) -> Session {
        let mut view = handle.subscribe();
        let session = tokio::time::timeout(Duration::from_secs(5), view.wait_for(pred))
            .await
            .expect("timed out waiting for session state")
            .expect("controller stopped");
        session.clone()
    }

    async fn start_live(h: &Harness) {
        assert!(h.handle.send(Event::Start).await);
        wait_until(&h.handle, |s| s.camera_live()).await;
    }

    #[tokio::test]
    async fn test_capture_resolves_to_found_then_close() {
        let h = harness(FakeRecognizer::with(vec![Verdict::matched("campana-1920", 0.9)]));
        start_live(&h).await;

        h.handle.send(Event::Capture).await;
        let session = wait_until(&h.handle, |s| s.phase() == Phase::Found).await;
        assert_eq!(session.current_artifact().unwrap().id, "campana-1920");

        h.handle.send(Event::Close).await;
        let session = wait_until(&h.handle, |s| s.phase() == Phase::Idle).await;
        assert!(session.current_artifact().is_none());
        assert!(session.message().is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_missing_verdicts_return_to_idle() {
        let h = harness(FakeRecognizer::with(vec![
            Verdict::matched("nonexistent-id", 0.9),
            Verdict::not_found(),
        ]));
        start_live(&h).await;

        for _ in 0..2 {
            h.handle.send(Event::Capture).await;
            let session = wait_until(&h.handle, |s| {
                matches!(s.state(), State::Idle { notice: Some(_) })
            })
            .await;
            assert!(session.message().is_some());
            h.handle.send(Event::DismissNotice).await;
            wait_until(&h.handle, |s| s.state() == &State::Idle { notice: None }).await;
        }
        assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_capture_while_scanning_is_inert() {
        let gate = Arc::new(Notify::new());
        let h = harness(FakeRecognizer {
            verdicts: Mutex::new(vec![Verdict::matched("globo-terraqueo", 0.8)]),
            gate: Some(gate.clone()),
            ..Default::default()
        });
        start_live(&h).await;

        h.handle.send(Event::Capture).await;
        wait_until(&h.handle, |s| s.phase() == Phase::Scanning).await;
        h.handle.send(Event::Capture).await;
        h.handle.send(Event::Capture).await;

        gate.notify_one();
        let session = wait_until(&h.handle, |s| s.phase() == Phase::Found).await;
        assert_eq!(session.current_artifact().unwrap().id, "globo-terraqueo");
        assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.camera.grabs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_fatal_then_recovers() {
        let h = harness(FakeRecognizer::default());
        h.camera.fail_acquire.store(true, Ordering::SeqCst);

        h.handle.send(Event::Start).await;
        let session = wait_until(&h.handle, |s| s.phase() == Phase::Error).await;
        assert!(session.message().unwrap().contains("permission denied"));
        assert!(!session.camera_live());

        h.handle.send(Event::Recover).await;
        wait_until(&h.handle, |s| s.phase() == Phase::Welcome).await;

        h.camera.fail_acquire.store(false, Ordering::SeqCst);
        start_live(&h).await;
        assert_eq!(h.camera.acquired(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_camera_exactly_once() {
        let h = harness(FakeRecognizer::default());
        start_live(&h).await;

        h.handle.shutdown().await;
        h.task.await.unwrap();
        assert_eq!(h.camera.acquired(), 1);
        assert_eq!(h.camera.stopped(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_from_welcome_never_touches_camera() {
        let h = harness(FakeRecognizer::default());
        h.handle.shutdown().await;
        h.task.await.unwrap();
        assert_eq!(h.camera.acquired(), 0);
        assert_eq!(h.camera.stopped(), 0);
    }
}

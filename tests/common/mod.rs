//! Shared test utilities
//!
//! Scripted capability providers that record every call into one ordered log.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use avatar_gateway::avatar::{SpeakRequest, SynthesisOutcome, Synthesizer};
use avatar_gateway::backend::Reasoner;
use avatar_gateway::config::RecognitionConfig;
use avatar_gateway::session::Notice;
use avatar_gateway::speech::{RecognitionSink, Recognizer};
use avatar_gateway::transport::{
    AvatarAppearance, ConnectionDescriptor, DescriptorSource, HealthState, MediaKind,
    MediaTransport, NegotiationRequest, TransportEvents, TransportHandle, TransportId,
};
use avatar_gateway::{Config, Error, Orchestrator, Providers, Result, SessionHandle};
use secrecy::SecretString;
use tokio::sync::{Notify, Semaphore, broadcast};

/// Ordered record of provider calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// Position of the first entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    /// Entries starting with a prefix, in order
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

/// Descriptor source that can be told to fail
pub struct FakeDescriptors {
    log: CallLog,
    failures: AtomicUsize,
}

impl FakeDescriptors {
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl DescriptorSource for FakeDescriptors {
    async fn fetch(&self) -> Result<ConnectionDescriptor> {
        self.log.push("descriptor");
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Descriptor("relay token endpoint returned 401".to_string()));
        }
        Ok(ConnectionDescriptor {
            relay_urls: vec!["turn:relay.test:3478".to_string()],
            username: "user".to_string(),
            credential: SecretString::from("secret".to_string()),
        })
    }
}

/// Transport that reports readiness as scripted
#[derive(Clone)]
pub struct FakeTransport {
    log: CallLog,
    live: Arc<Mutex<Option<TransportEvents>>>,
    send_video: Arc<AtomicBool>,
    reject: Arc<AtomicBool>,
}

impl FakeTransport {
    /// Report a failed health state on the live transport
    pub fn fail(&self) -> bool {
        let live = self.live.lock().unwrap().clone();
        match live {
            Some(events) => {
                events.health(HealthState::Failed);
                true
            }
            None => false,
        }
    }

    /// Only ever play audio
    pub fn audio_only(&self) {
        self.send_video.store(false, Ordering::SeqCst);
    }

    /// Fail every negotiation from now on
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct FakeHandle {
    id: TransportId,
    log: CallLog,
}

impl TransportHandle for FakeHandle {
    fn close(&mut self) {
        self.log.push(format!("close {}", self.id));
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn negotiate(
        &self,
        _request: NegotiationRequest,
        events: TransportEvents,
    ) -> Result<Box<dyn TransportHandle>> {
        let id = events.id();
        self.log.push(format!("negotiate {id}"));

        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("ice failed".to_string()));
        }

        events.health(HealthState::Checking);
        events.track(MediaKind::Audio, format!("{id}-audio"));
        events.playing(MediaKind::Audio);
        if self.send_video.load(Ordering::SeqCst) {
            events.track(MediaKind::Video, format!("{id}-video"));
            events.playing(MediaKind::Video);
        }
        events.health(HealthState::Connected);

        *self.live.lock().unwrap() = Some(events);
        Ok(Box::new(FakeHandle {
            id,
            log: self.log.clone(),
        }))
    }
}

/// Recognizer driven by the test
#[derive(Clone)]
pub struct FakeRecognizer {
    log: CallLog,
    sink: Arc<Mutex<Option<RecognitionSink>>>,
}

impl FakeRecognizer {
    fn sink(&self) -> Option<RecognitionSink> {
        self.sink.lock().unwrap().clone()
    }

    pub fn is_listening(&self) -> bool {
        self.sink().is_some()
    }

    /// Wait for the session to start recognition
    pub async fn wait_listening(&self) {
        for _ in 0..1000 {
            if self.is_listening() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("recognizer was never started");
    }

    /// Speak an utterance: one interim then the final transcript
    pub fn say(&self, text: &str) {
        let sink = self.sink().expect("recognizer not started");
        sink.interim(text);
        sink.final_transcript(text, Some("en-US".to_string()));
    }

    /// Emit only a partial hypothesis
    pub fn murmur(&self, text: &str) {
        let sink = self.sink().expect("recognizer not started");
        sink.interim(text);
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn start(&self, _config: &RecognitionConfig, sink: RecognitionSink) -> Result<()> {
        self.log.push("recognizer start");
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.log.push("recognizer stop");
        *self.sink.lock().unwrap() = None;
        Ok(())
    }
}

/// Synthesizer whose utterances last until finished or cancelled
pub struct FakeSynthesizer {
    log: CallLog,
    done: Notify,
}

impl FakeSynthesizer {
    /// Let the current utterance play to the end
    pub fn finish(&self) {
        self.done.notify_waiters();
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn attach(&self, transport: TransportId, _appearance: &AvatarAppearance) -> Result<()> {
        self.log.push(format!("attach {transport}"));
        Ok(())
    }

    async fn speak(&self, request: SpeakRequest) -> Result<SynthesisOutcome> {
        self.log.push(format!("speak: {}", request.text));
        self.done.notified().await;
        Ok(SynthesisOutcome::Completed)
    }

    fn cancel(&self) {
        self.log.push("cancel");
    }
}

enum Scripted {
    Text(String),
    Fail,
}

/// Reasoner with scripted answers and an optional gate
pub struct FakeReasoner {
    log: CallLog,
    replies: Mutex<HashMap<String, Scripted>>,
    gate: Semaphore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeReasoner {
    pub fn reply(&self, question: &str, answer: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(question.to_string(), Scripted::Text(answer.to_string()));
    }

    pub fn fail(&self, question: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(question.to_string(), Scripted::Fail);
    }

    /// Let `n` held requests answer
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reasoner for FakeReasoner {
    async fn ask(&self, question: &str) -> Result<String> {
        self.log.push(format!("ask: {question}"));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.gate
            .acquire()
            .await
            .expect("gate closed")
            .forget();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.replies.lock().unwrap().get(question) {
            Some(Scripted::Text(answer)) => Ok(answer.clone()),
            Some(Scripted::Fail) => Err(Error::Backend {
                status: 500,
                body: "boom".to_string(),
            }),
            None => Ok(format!("answer: {question}")),
        }
    }
}

/// A full set of fakes sharing one log
pub struct Harness {
    pub log: CallLog,
    pub descriptors: Arc<FakeDescriptors>,
    pub transport: FakeTransport,
    pub recognizer: FakeRecognizer,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub reasoner: Arc<FakeReasoner>,
    pub config: Config,
}

impl Harness {
    /// Fakes whose backend answers immediately
    pub fn new() -> Self {
        Self::build(Semaphore::MAX_PERMITS)
    }

    /// Fakes whose backend holds every answer until released
    pub fn gated() -> Self {
        Self::build(0)
    }

    fn build(permits: usize) -> Self {
        let log = CallLog::default();
        Self {
            descriptors: Arc::new(FakeDescriptors {
                log: log.clone(),
                failures: AtomicUsize::new(0),
            }),
            transport: FakeTransport {
                log: log.clone(),
                live: Arc::default(),
                send_video: Arc::new(AtomicBool::new(true)),
                reject: Arc::new(AtomicBool::new(false)),
            },
            recognizer: FakeRecognizer {
                log: log.clone(),
                sink: Arc::default(),
            },
            synthesizer: Arc::new(FakeSynthesizer {
                log: log.clone(),
                done: Notify::new(),
            }),
            reasoner: Arc::new(FakeReasoner {
                log: log.clone(),
                replies: Mutex::default(),
                gate: Semaphore::new(permits),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
            config: test_config(),
            log,
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            descriptors: self.descriptors.clone(),
            transport: Arc::new(self.transport.clone()),
            recognizer: Arc::new(self.recognizer.clone()),
            synthesizer: self.synthesizer.clone(),
            reasoner: self.reasoner.clone(),
        }
    }

    pub fn spawn(&self) -> SessionHandle {
        Orchestrator::spawn(self.config.clone(), self.providers())
    }
}

/// Default configuration with a short greeting
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.avatar.greeting = "Hello!".to_string();
    config.avatar.apology = "Sorry, please try again.".to_string();
    config.session.reconnect_delay = Duration::from_millis(3000);
    config
}

/// Wait for the first notice matching a predicate
pub async fn next_notice(
    notices: &mut broadcast::Receiver<Notice>,
    mut matches: impl FnMut(&Notice) -> bool,
) -> Notice {
    loop {
        let notice = notices.recv().await.expect("notice stream ended");
        if matches(&notice) {
            return notice;
        }
    }
}

/// Drain notices already published
pub fn drain_notices(notices: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

/// Let every runnable task make progress
///
/// With the clock paused, the runtime only advances time once nothing else can
/// run, so a short sleep returns after spawned work has settled.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

//! Shared fixtures: a scripted line transport whose sources are fed by the test.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_stream::{
    DataPrefixDecoder, LineEvent, LineSink, LineSourceHandle, LineTransport, RecordRef, SensorRecord, StreamError,
    StreamHub, StreamRequest,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One `open` call as seen by the transport.
pub struct OpenedSource {
    pub url: String,
    pub sink: LineSink,
    pub handle: LineSourceHandle,
}

/// Records every open and counts cancellations. Lines are pushed by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    opened: Mutex<Vec<OpenedSource>>,
    cancels: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn opens(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn url(&self, index: usize) -> String {
        self.opened.lock().unwrap()[index].url.clone()
    }

    pub fn is_cancelled(&self, index: usize) -> bool {
        self.opened.lock().unwrap()[index].handle.is_cancelled()
    }

    pub fn sink(&self, index: usize) -> LineSink {
        self.opened.lock().unwrap()[index].sink.clone()
    }

    /// Sends events on source `index`, ignoring a hub that already stopped listening.
    pub async fn emit(&self, index: usize, events: impl IntoIterator<Item = LineEvent>) {
        let sink = self.sink(index);
        for event in events {
            let _ = sink.send(event).await;
        }
    }
}

impl LineTransport for ScriptedTransport {
    fn open(&self, request: &StreamRequest, sink: LineSink) -> LineSourceHandle {
        let handle = LineSourceHandle::new(CancellationToken::new());
        let token = handle.token();
        let cancels = Arc::clone(&self.cancels);
        tokio::spawn(async move {
            token.cancelled().await;
            cancels.fetch_add(1, Ordering::SeqCst);
        });
        self.opened.lock().unwrap().push(OpenedSource {
            url: request.url().to_string(),
            sink,
            handle: handle.clone(),
        });
        handle
    }
}

pub fn harness() -> (Arc<ScriptedTransport>, StreamHub) {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = Arc::new(ScriptedTransport::default());
    let hub = StreamHub::new(transport.clone(), Arc::new(DataPrefixDecoder::strict()));
    (transport, hub)
}

pub fn request(path: &str) -> StreamRequest {
    StreamRequest::get(Url::parse(&format!("http://sensors.test/{}", path)).unwrap())
}

pub fn sensor_line(n: u32) -> String {
    format!(
        "data:{{\"id\":\"sensor-{}\",\"temperature\":{}.5,\"humidity\":40.0,\"timestamp\":\"2024-05-01T12:00:{:02}\"}}",
        n,
        20 + n,
        n % 60
    )
}

pub fn lines(range: std::ops::Range<u32>) -> Vec<LineEvent> {
    range.map(|n| LineEvent::Line(sensor_line(n))).collect()
}

pub fn sensor(n: u32) -> SensorRecord {
    SensorRecord::new(format!("sensor-{}", n), "2024-05-01T12:00:00")
}

/// Polls `cond` every 10ms for up to two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// What a shape callback observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Next(String),
    Error(StreamError),
    Complete,
    Empty,
}

/// Collects callback invocations through a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Seen>,
    rx: mpsc::UnboundedReceiver<Seen>,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn on_next(&self) -> impl FnMut(RecordRef) + Send + 'static {
        let tx = self.tx.clone();
        move |record| {
            let _ = tx.send(Seen::Next(record.id.clone()));
        }
    }

    pub fn on_next_once(&self) -> impl FnOnce(RecordRef) + Send + 'static {
        let tx = self.tx.clone();
        move |record| {
            let _ = tx.send(Seen::Next(record.id.clone()));
        }
    }

    /// `on_next` that sleeps after each record, simulating a slow consumer.
    pub fn slow_on_next(&self, delay: Duration) -> impl FnMut(RecordRef) + Send + 'static {
        let tx = self.tx.clone();
        move |record| {
            let _ = tx.send(Seen::Next(record.id.clone()));
            std::thread::sleep(delay);
        }
    }

    pub fn on_error(&self) -> impl FnOnce(StreamError) + Send + 'static {
        let tx = self.tx.clone();
        move |error| {
            let _ = tx.send(Seen::Error(error));
        }
    }

    pub fn on_complete(&self) -> impl FnOnce() + Send + 'static {
        let tx = self.tx.clone();
        move || {
            let _ = tx.send(Seen::Complete);
        }
    }

    pub fn on_single(&self) -> impl FnOnce(Option<RecordRef>) + Send + 'static {
        let tx = self.tx.clone();
        move |record| {
            let _ = tx.send(match record {
                Some(record) => Seen::Next(record.id.clone()),
                None => Seen::Empty,
            });
        }
    }

    /// Everything observed so far, without waiting.
    pub fn drain(&mut self) -> Vec<Seen> {
        let mut seen = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    /// Waits until a terminal event (error, complete or empty) shows up, then returns all events.
    pub async fn until_terminal(&mut self) -> Vec<Seen> {
        let mut seen = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => {
                        let terminal = matches!(event, Seen::Error(_) | Seen::Complete | Seen::Empty);
                        seen.push(event);
                        if terminal {
                            return seen;
                        }
                    }
                    None => return seen,
                },
                _ = &mut deadline => return seen,
            }
        }
    }
}

pub fn ids(seen: &[Seen]) -> Vec<String> {
    seen.iter()
        .filter_map(|event| match event {
            Seen::Next(id) => Some(id.clone()),
            _ => None,
        })
        .collect()
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::{sync::oneshot, task};

use super::diagnostics::{DiagnosticsStream, SinkDiagnostic};
use super::emitter::EventEmitter;
use super::hub::{EventHub, EventStream};
use super::sink::{EventSink, StdOutSink};

const DIAGNOSTICS_BUFFER_CAPACITY: usize = 256;

/// Central event broadcasting system for engine diagnostics and node events.
///
/// `EventBus` receives events published by the [`WorkflowExecutionEngine`](crate::engine::WorkflowExecutionEngine)
/// and fans them out to multiple sinks (stdout, in-memory, channels, files, …).
/// It's observability infrastructure, not part of the routing/state machinery
/// itself — a thread executes identically whether zero or five sinks are
/// attached.
///
/// ```text
/// Node execution / router decisions
///     │ emitter.emit()
///     ▼
/// EventBus
///     │ broadcast
///     ├─────┬─────┬─────┐
///     ▼     ▼     ▼     ▼
/// StdOut Channel Memory Custom
///  Sink   Sink   Sink   Sink
/// ```
///
/// # Usage Patterns
///
/// ## Default EventBus (Stdout Only)
///
/// ```rust,no_run
/// use threadengine::event_bus::{EventBus, Event};
///
/// let bus = EventBus::default();
/// bus.listen_for_events();
/// bus.get_emitter().emit(Event::diagnostic("engine", "started")).unwrap();
/// ```
///
/// ## Streaming to an external consumer
///
/// ```rust,no_run
/// use threadengine::event_bus::{EventBus, ChannelSink, StdOutSink};
///
/// # async fn example() {
/// let (tx, rx) = flume::unbounded();
/// let bus = EventBus::with_sinks(vec![
///     Box::new(StdOutSink::default()),
///     Box::new(ChannelSink::new(tx)),
/// ]);
/// bus.listen_for_events();
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv_async().await {
///         println!("Event: {:?}", event);
///     }
/// });
/// # }
/// ```
///
/// # Available Sinks
///
/// - [`StdOutSink`](crate::event_bus::StdOutSink) - Write to stdout (default)
/// - [`ChannelSink`](crate::event_bus::ChannelSink) - Stream to async channels
/// - [`MemorySink`](crate::event_bus::MemorySink) - Capture for testing
/// - Custom sinks implementing [`EventSink`](crate::event_bus::EventSink)
const DEFAULT_BUFFER_CAPACITY: usize = 1024;

pub struct EventBus {
    sinks: Arc<Mutex<Vec<SinkEntry>>>,
    hub: Arc<EventHub>,
    started: AtomicBool,
    diag_sender: broadcast::Sender<SinkDiagnostic>,
    diag_occurrence: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_capacity(sinks, DEFAULT_BUFFER_CAPACITY)
    }

    pub(crate) fn with_capacity(sinks: Vec<Box<dyn EventSink>>, buffer_capacity: usize) -> Self {
        let hub = EventHub::new(buffer_capacity);
        let entries = sinks.into_iter().map(SinkEntry::new).collect();
        let (diag_sender, _) = broadcast::channel(DIAGNOSTICS_BUFFER_CAPACITY);
        Self {
            sinks: Arc::new(Mutex::new(entries)),
            hub,
            started: AtomicBool::new(false),
            diag_sender,
            diag_occurrence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.add_boxed_sink(Box::new(sink));
    }

    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) {
        let mut sinks = self.sinks.lock().unwrap();
        let mut entry = SinkEntry::new(sink);
        if self.started.load(Ordering::SeqCst) {
            entry.spawn_worker(self.hub.clone(), self.diag_sender.clone(), self.diag_occurrence.clone());
        }
        sinks.push(entry);
    }

    pub fn get_emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(self.hub.emitter())
    }

    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    /// Subscribe to a stream of [`SinkDiagnostic`]s raised whenever an attached
    /// sink's `handle()` call fails (e.g. a closed file handle or a broken pipe).
    pub fn subscribe_diagnostics(&self) -> DiagnosticsStream {
        DiagnosticsStream::new(self.diag_sender.subscribe())
    }

    pub fn listen_for_events(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sinks = self.sinks.lock().unwrap();
        for entry in sinks.iter_mut() {
            entry.spawn_worker(self.hub.clone(), self.diag_sender.clone(), self.diag_occurrence.clone());
        }
    }

    pub async fn stop_listener(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut sinks = self.sinks.lock().unwrap();
        for entry in sinks.iter_mut() {
            entry.stop_worker().await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) {
            if let Ok(mut sinks) = self.sinks.lock() {
                for entry in sinks.iter_mut() {
                    entry.abort_worker();
                }
            }
        }
    }
}

struct SinkEntry {
    sink: Arc<Mutex<Box<dyn EventSink>>>,
    worker: Option<SinkWorker>,
}

impl SinkEntry {
    fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            worker: None,
        }
    }

    fn spawn_worker(&mut self, hub: Arc<EventHub>, diag_sender: broadcast::Sender<SinkDiagnostic>, diag_occurrence: Arc<AtomicU64>) {
        if self.worker.is_some() {
            return;
        }
        let sink = Arc::clone(&self.sink);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut stream = hub.subscribe();
        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = stream.recv() => match event {
                        Ok(event) => {
                            if let Ok(mut guard) = sink.lock() {
                                if let Err(err) = guard.handle(&event) {
                                    let occurrence = diag_occurrence.fetch_add(1, Ordering::Relaxed) + 1;
                                    let _ = diag_sender.send(SinkDiagnostic {
                                        sink: guard.name(),
                                        error: err.to_string(),
                                        when: Utc::now(),
                                        occurrence,
                                    });
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        });
        self.worker = Some(SinkWorker {
            shutdown: shutdown_tx,
            handle,
        });
    }

    async fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            let _ = worker.handle.await;
        }
    }

    fn abort_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            worker.handle.abort();
        }
    }
}

struct SinkWorker {
    shutdown: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use super::*;
    use super::super::event::Event;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn handle(&mut self, _event: &Event) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink unavailable"))
        }

        fn name(&self) -> String {
            "failing-sink".to_string()
        }
    }

    #[tokio::test]
    async fn sink_errors_are_published_as_diagnostics() {
        let bus = EventBus::with_sink(FailingSink);
        let mut diagnostics = bus.subscribe_diagnostics();
        bus.listen_for_events();
        bus.get_emitter().emit(Event::diagnostic("test", "hello")).unwrap();

        let diag = tokio::time::timeout(Duration::from_secs(1), diagnostics.recv())
            .await
            .expect("timed out waiting for diagnostic")
            .expect("diagnostic channel closed");
        assert_eq!(diag.sink, "failing-sink");
        assert_eq!(diag.occurrence, 1);
    }
}

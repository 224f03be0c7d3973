//! Scripted in-memory transport and event recording for engine tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mbpoll::{
    ConnectOptions, ConnectionKind, EngineEvent, EngineHandle, EventKind, ModbusRequest, Reply,
    ResponseData, Transport, TransportError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How the transport answers the next request.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(TransportError),
    /// Failure that also takes the link down.
    FailAndDrop(TransportError),
    /// Success followed by a spurious error for the same request.
    SucceedThenFail(TransportError),
    /// Keep the reply; the test releases it with `release_held`.
    Hold,
}

#[derive(Default)]
pub struct ScriptedTransport {
    open: AtomicBool,
    device_id: AtomicU8,
    timeout_ms: AtomicU64,
    connects: AtomicUsize,
    connect_results: Mutex<VecDeque<Result<(), TransportError>>>,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ModbusRequest>>,
    held: Mutex<Vec<Reply>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open() -> Arc<Self> {
        let transport = Self::default();
        transport.open.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn script(&self, scripts: impl IntoIterator<Item = Script>) {
        self.scripts.lock().unwrap().extend(scripts);
    }

    pub fn script_connects(&self, results: impl IntoIterator<Item = Result<(), TransportError>>) {
        self.connect_results.lock().unwrap().extend(results);
    }

    pub fn requests(&self) -> Vec<ModbusRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn addresses(&self) -> Vec<u16> {
        self.requests().iter().map(|r| r.address).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn release_held(&self, result: Result<ResponseData, TransportError>) {
        for reply in self.held.lock().unwrap().drain(..) {
            reply.send(result.clone());
        }
    }

    fn response_for(request: &ModbusRequest) -> ResponseData {
        let quantity = request.value.first().unwrap_or(1);
        if request.function.is_read() {
            ResponseData::Registers(vec![request.address; quantity as usize])
        } else {
            ResponseData::Written {
                address: request.address,
                quantity: request.value.as_slice().len() as u16,
            }
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        _kind: ConnectionKind,
        _host: &str,
        _options: &ConnectOptions,
    ) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let result = self
            .connect_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() {
            self.open.store(true, Ordering::SeqCst);
        }
        result
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn set_device_id(&self, id: u8) {
        self.device_id.store(id, Ordering::SeqCst);
    }

    fn device_id(&self) -> u8 {
        self.device_id.load(Ordering::SeqCst)
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    fn submit(&self, request: ModbusRequest, reply: Reply) {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Succeed);

        match script {
            Script::Succeed => reply.send(Ok(Self::response_for(&request))),
            Script::Fail(error) => reply.send(Err(error)),
            Script::FailAndDrop(error) => {
                self.open.store(false, Ordering::SeqCst);
                reply.send(Err(error));
            }
            Script::SucceedThenFail(error) => {
                reply.send(Ok(Self::response_for(&request)));
                reply.send(Err(error));
            }
            Script::Hold => self.held.lock().unwrap().push(reply),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every event the engine publishes, in order.
pub struct Recorder {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
    pub seen: Vec<EngineEvent>,
}

impl Recorder {
    pub fn attach(handle: &EngineHandle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            handle.on(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        Self {
            rx,
            seen: Vec::new(),
        }
    }

    /// Collect events until one of `kind` arrives.
    pub async fn wait_for(&mut self, kind: EventKind) -> EngineEvent {
        let deadline = Duration::from_secs(600);
        tokio::time::timeout(deadline, async {
            loop {
                let event = self.rx.recv().await.expect("engine dropped listeners");
                self.seen.push(event.clone());
                if event.kind() == kind {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {} event within {:?}", kind, deadline))
    }

    /// Collect whatever arrives within `window` of virtual time.
    pub async fn drain_for(&mut self, window: Duration) {
        let _ = tokio::time::timeout(window, async {
            while let Some(event) = self.rx.recv().await {
                self.seen.push(event);
            }
        })
        .await;
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.seen.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn states(&self) -> Vec<mbpoll::EngineState> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                EngineEvent::StateChange { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<mbpoll::PollError> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }
}

//! The polling engine.
//!
//! One tokio task owns every piece of mutable state: the state machine,
//! the poll list, the retry counter, the timers and the table of in-flight
//! requests. Everything that can change that state arrives as a
//! [`Command`] on a single channel: caller requests from an
//! [`EngineHandle`], timer expiries and transport completions. Each command
//! is applied to completion before the next is looked at, so a completion
//! can never interleave with a tick.
//!
//! A pass walks the poll list once:
//!
//! ```text
//! INIT/CLOSED --connect--> GOOD_CONNECT --read item[0]--> GOOD_READ --read item[1]--> ... DONE
//!                 \                         \
//!                  FAIL_CONNECT              FAIL_READ --(open)--> NEXT --retry same item-->
//! ```
//!
//! Three consecutive failures since the last success or connect end the
//! pass in `FAIL_STOP`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectionConfig, EngineConfig};
use crate::error::{PollError, Result, TransportError};
use crate::events::{EngineEvent, EventBus, EventKind};
use crate::item::{FunctionCode, PollItem, PollValue};
use crate::scheduler::PollList;
use crate::state::EngineState;
use crate::timer::ScheduledTask;
use crate::transport::{
    Completion, ConnectionKind, ModbusData, ModbusRequest, Reply, RequestId, Transport,
};

/// Consecutive failures that end a pass.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Messages processed by the engine task.
enum Command {
    Init(EngineConfig, oneshot::Sender<Result<()>>),
    Install(Vec<PollItem>, oneshot::Sender<Result<()>>),
    Connect(Option<ConnectionConfig>, oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<Result<()>>),
    Read(PollItem, oneshot::Sender<Result<ModbusData>>),
    Write(PollItem, oneshot::Sender<Result<ModbusData>>),
    StartPolling(oneshot::Sender<Result<()>>),
    StopPolling(oneshot::Sender<Result<()>>),
    StartMonitor(oneshot::Sender<Result<()>>),
    StopMonitor(oneshot::Sender<Result<()>>),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Tick { timer: u64 },
    MonitorTick { timer: u64 },
    Connected {
        request: RequestId,
        result: std::result::Result<(), TransportError>,
    },
    Completed(Completion),
    Closed {
        result: std::result::Result<(), TransportError>,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    /// Index of the current poll item.
    pub cursor: usize,
    /// Consecutive failures in the current pass.
    pub retries: u32,
    /// Whether a pass is running (a tick is pending).
    pub polling: bool,
    pub monitoring: bool,
    /// Passes started since the engine was created.
    pub passes: u64,
    pub in_flight: usize,
}

/// Which wrapper issued a request; decides the GOOD_*/FAIL_* pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Read,
    Write,
}

impl RequestKind {
    fn good(self) -> EngineState {
        match self {
            RequestKind::Read => EngineState::GoodRead,
            RequestKind::Write => EngineState::GoodWrite,
        }
    }

    fn fail(self) -> EngineState {
        match self {
            RequestKind::Read => EngineState::FailRead,
            RequestKind::Write => EngineState::FailWrite,
        }
    }
}

/// Who is waiting on an action.
enum Origin {
    /// Issued by the state machine during pass `n`.
    Pass(u64),
    /// A caller of `connect`.
    Link(oneshot::Sender<Result<()>>),
    /// A caller of `read`/`write`.
    Request(oneshot::Sender<Result<ModbusData>>),
}

impl Origin {
    fn fail(self, error: PollError) {
        match self {
            Origin::Pass(_) => {}
            Origin::Link(tx) => {
                let _ = tx.send(Err(error));
            }
            Origin::Request(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

enum Pending {
    Connect {
        kind: ConnectionKind,
        link: ConnectionConfig,
    },
    Request {
        kind: RequestKind,
        item: PollItem,
    },
}

struct InFlight {
    pending: Pending,
    origin: Origin,
}

/// Next step decided by a tick.
enum Action {
    Connect,
    PollCurrent,
}

/// Engine state owned by the engine task.
pub struct Engine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    commands: mpsc::WeakUnboundedSender<Command>,

    state: EngineState,
    poll_list: PollList,
    retries: u32,
    pass: u64,

    tick_timer: Option<ScheduledTask>,
    monitor_timer: Option<ScheduledTask>,
    next_timer_id: u64,

    in_flight: HashMap<RequestId, InFlight>,
    next_request_id: u64,
}

impl Engine {
    /// Start an engine task driving `transport` and return its handle.
    ///
    /// Must be called from within a tokio runtime. The task ends when every
    /// handle is dropped or [`EngineHandle::shutdown`] is called.
    pub fn spawn(transport: Arc<dyn Transport>, config: EngineConfig) -> EngineHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = EventBus::new();

        transport.set_device_id(config.device_id);
        transport.set_timeout(config.timeout());

        let engine = Engine {
            config,
            transport: transport.clone(),
            bus: bus.clone(),
            commands: tx.downgrade(),
            state: EngineState::Init,
            poll_list: PollList::new(),
            retries: 0,
            pass: 0,
            tick_timer: None,
            monitor_timer: None,
            next_timer_id: 0,
            in_flight: HashMap::new(),
            next_request_id: 0,
        };

        tokio::spawn(engine.run(rx));

        EngineHandle {
            commands: tx,
            bus,
            transport,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!(connection = %self.config.connection, host = %self.config.host, "Engine started");

        while let Some(command) = rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
        }

        self.tick_timer = None;
        self.monitor_timer = None;
        debug!("Engine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Init(config, reply) => {
                let _ = reply.send(self.init(config));
            }
            Command::Install(items, reply) => {
                let _ = reply.send(self.install(items));
            }
            Command::Connect(link, reply) => {
                if self.is_polling() {
                    let _ = reply.send(Err(PollError::Busy));
                } else {
                    self.connect(link, Origin::Link(reply));
                }
            }
            Command::Close(reply) => self.close(reply),
            Command::Read(item, reply) => {
                if self.is_polling() {
                    let _ = reply.send(Err(PollError::Busy));
                } else {
                    self.read(item, Origin::Request(reply));
                }
            }
            Command::Write(item, reply) => {
                if self.is_polling() {
                    let _ = reply.send(Err(PollError::Busy));
                } else {
                    self.write(item, Origin::Request(reply));
                }
            }
            Command::StartPolling(reply) => {
                let _ = reply.send(self.start_polling());
            }
            Command::StopPolling(reply) => {
                self.stop_polling();
                let _ = reply.send(Ok(()));
            }
            Command::StartMonitor(reply) => {
                let _ = reply.send(self.start_monitor());
            }
            Command::StopMonitor(reply) => {
                self.stop_monitor();
                let _ = reply.send(Ok(()));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Tick { timer } => {
                if self.tick_timer.as_ref().map(ScheduledTask::id) != Some(timer) {
                    trace!(timer, "Ignoring cancelled tick");
                    return;
                }
                self.tick_timer = None;
                self.tick();
            }
            Command::MonitorTick { timer } => {
                if self.monitor_timer.as_ref().map(ScheduledTask::id) != Some(timer) {
                    trace!(timer, "Ignoring cancelled monitor tick");
                    return;
                }
                self.monitor_tick();
            }
            Command::Connected { request, result } => self.on_connected(request, result),
            Command::Completed(completion) => self.on_completed(completion),
            Command::Closed { result, reply } => self.on_closed(result, reply),
            Command::Shutdown => {}
        }
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    /// Assign a new state and publish it.
    fn transition(&mut self, next: EngineState) {
        trace!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.bus.emit(EngineEvent::StateChange {
            state: next,
            description: next.description(),
        });
    }

    fn is_polling(&self) -> bool {
        self.tick_timer.is_some()
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            cursor: self.poll_list.cursor(),
            retries: self.retries,
            polling: self.is_polling(),
            monitoring: self.monitor_timer.is_some(),
            passes: self.pass,
            in_flight: self.in_flight.len(),
        }
    }

    fn init(&mut self, config: EngineConfig) -> Result<()> {
        if self.is_polling() {
            return Err(PollError::Busy);
        }
        config
            .validate()
            .map_err(|e| PollError::config(e.to_string()))?;
        self.transport.set_device_id(config.device_id);
        self.transport.set_timeout(config.timeout());
        info!(connection = %config.connection, host = %config.host, "Engine re-initialized");
        self.config = config;
        Ok(())
    }

    fn install(&mut self, items: Vec<PollItem>) -> Result<()> {
        if self.is_polling() {
            return Err(PollError::Busy);
        }
        self.poll_list.install(items)?;
        self.retries = 0;
        debug!(items = self.poll_list.len(), "Poll list installed");
        self.transition(EngineState::Init);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pass control
    // ---------------------------------------------------------------------

    fn start_polling(&mut self) -> Result<()> {
        if self.is_polling() {
            return Err(PollError::Overlap);
        }
        self.begin_pass()
    }

    /// Reset the cursor and retry budget and run the first tick.
    fn begin_pass(&mut self) -> Result<()> {
        if self.poll_list.is_empty() {
            return Err(PollError::config("No poll list installed"));
        }
        // Includes requests left over from a stopped pass: the link serves
        // one exchange at a time.
        if !self.in_flight.is_empty() {
            return Err(PollError::Busy);
        }

        self.pass += 1;
        self.poll_list.reset();
        self.retries = 0;

        let entry = if self.transport.is_open() {
            EngineState::Next
        } else {
            EngineState::Init
        };
        info!(pass = self.pass, items = self.poll_list.len(), entry = %entry, "Polling pass started");

        self.transition(entry);
        self.bus.emit(EngineEvent::PollingStart);
        self.tick();
        Ok(())
    }

    fn stop_polling(&mut self) {
        match self.tick_timer.take() {
            Some(timer) => {
                timer.cancel();
                info!(pass = self.pass, state = %self.state, "Polling pass stopped");
            }
            None => debug!("Stop requested with no pass running"),
        }
        self.bus.emit(EngineEvent::PollingStop);
    }

    /// The pass reached DONE or FAIL_STOP.
    fn finish_pass(&mut self) {
        self.tick_timer = None;
        if self.state == EngineState::FailStop {
            warn!(pass = self.pass, retries = self.retries, "Polling pass failed");
        } else {
            info!(pass = self.pass, items = self.poll_list.len(), "Polling pass done");
        }
        self.bus.emit(EngineEvent::PollingStop);
    }

    fn arm_tick(&mut self) {
        let id = self.next_timer();
        let commands = self.commands.clone();
        self.tick_timer = Some(ScheduledTask::once(
            id,
            self.config.scan_interval(),
            move || send(&commands, Command::Tick { timer: id }),
        ));
    }

    /// One step of the state machine.
    fn tick(&mut self) {
        trace!(state = %self.state, cursor = self.poll_list.cursor(), retries = self.retries, "Tick");

        let action = match self.state {
            EngineState::Init | EngineState::Closed => Some(Action::Connect),
            EngineState::GoodRead | EngineState::GoodWrite => {
                if self.poll_list.is_last_item() {
                    self.transition(EngineState::Done);
                    None
                } else {
                    self.poll_list.advance();
                    Some(self.reset_retries_and_poll())
                }
            }
            EngineState::GoodConnect => Some(self.reset_retries_and_poll()),
            EngineState::Next => Some(Action::PollCurrent),
            EngineState::FailConnect | EngineState::FailRead | EngineState::FailWrite => {
                self.register_failure()
            }
            EngineState::Idle | EngineState::FailStop | EngineState::Done => None,
        };

        if let Some(action) = action {
            self.transition(EngineState::Idle);
            self.launch(action);
        }

        if self.state.is_terminal() {
            self.finish_pass();
        } else {
            self.arm_tick();
        }
    }

    /// Shared by GOOD_CONNECT and the success states: a success clears the
    /// budget, then the item under the cursor is issued.
    fn reset_retries_and_poll(&mut self) -> Action {
        self.retries = 0;
        Action::PollCurrent
    }

    /// Count a failure and decide between stop, retry and reconnect.
    fn register_failure(&mut self) -> Option<Action> {
        self.retries += 1;

        if self.retries >= MAX_CONSECUTIVE_FAILURES {
            warn!(retries = self.retries, cursor = self.poll_list.cursor(), "Retry budget exhausted");
            self.transition(EngineState::FailStop);
            self.bus.emit_error(PollError::RetryBudgetExceeded {
                retries: self.retries,
            });
            None
        } else if self.transport.is_open() {
            debug!(retries = self.retries, cursor = self.poll_list.cursor(), "Retrying item");
            self.transition(EngineState::Next);
            None
        } else {
            debug!(retries = self.retries, "Link closed, reconnecting");
            Some(Action::Connect)
        }
    }

    fn launch(&mut self, action: Action) {
        let origin = Origin::Pass(self.pass);
        match action {
            Action::Connect => self.connect(None, origin),
            Action::PollCurrent => {
                let Some(item) = self.poll_list.current().cloned() else {
                    return;
                };
                match item.function_code() {
                    Ok(fc) if fc.is_read() => self.read(item, origin),
                    _ => self.write(item, origin),
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Monitor
    // ---------------------------------------------------------------------

    fn start_monitor(&mut self) -> Result<()> {
        if self.monitor_timer.is_some() {
            debug!("Monitor already running");
            return Ok(());
        }

        let period = self.config.monitor_interval();
        if period.is_zero() {
            return Err(PollError::config("Monitor interval must be non-zero"));
        }

        let id = self.next_timer();
        let commands = self.commands.clone();
        self.monitor_timer = Some(ScheduledTask::repeating(id, period, move || {
            send(&commands, Command::MonitorTick { timer: id })
        }));

        let interval_ms = period.as_millis() as u64;
        info!(interval_ms, "Monitor started");
        self.bus.emit(EngineEvent::MonitorStart);
        Ok(())
    }

    fn monitor_tick(&mut self) {
        if self.is_polling() || !self.in_flight.is_empty() {
            warn!(
                pass = self.pass,
                cursor = self.poll_list.cursor(),
                in_flight = self.in_flight.len(),
                "Monitor intervals overlap"
            );
            self.bus.emit_error(PollError::Overlap);
            return;
        }

        if let Err(e) = self.begin_pass() {
            warn!(error = %e, "Monitor could not start a pass");
            self.bus.emit_error(e);
        }
    }

    fn stop_monitor(&mut self) {
        if let Some(timer) = self.monitor_timer.take() {
            timer.cancel();
        }
        self.stop_polling();
        info!("Monitor stopped");
        self.bus.emit(EngineEvent::MonitorStop);
    }

    // ---------------------------------------------------------------------
    // Actions
    // ---------------------------------------------------------------------

    fn connect(&mut self, link: Option<ConnectionConfig>, origin: Origin) {
        let link = link.unwrap_or_else(|| self.config.link());

        let kind = match link.connection.parse::<ConnectionKind>() {
            Ok(kind) => kind,
            Err(e) => {
                // Retrying cannot fix a bad connection type.
                warn!(connection = %link.connection, "Unsupported connection type");
                self.transition(EngineState::FailStop);
                self.bus.emit_error(e.clone());
                origin.fail(e);
                return;
            }
        };

        let request = self.next_request();
        debug!(request = %request, kind = %kind, host = %link.host, "Connecting");
        self.in_flight.insert(
            request,
            InFlight {
                pending: Pending::Connect {
                    kind,
                    link: link.clone(),
                },
                origin,
            },
        );

        let transport = self.transport.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = transport.connect(kind, &link.host, &link.options).await;
            send(&commands, Command::Connected { request, result });
        });
    }

    /// Validate a read and hand it to the write path.
    fn read(&mut self, mut item: PollItem, origin: Origin) {
        let fc = match item.function_code() {
            Ok(fc) => fc,
            Err(e) => return self.reject(RequestKind::Read, e, origin),
        };
        if !fc.is_read() {
            let error = PollError::config(format!("{} is not a read FC", fc));
            return self.reject(RequestKind::Read, error, origin);
        }

        if item.value.is_none() {
            item.value = item.length.map(PollValue::Single);
        }
        match item.value {
            Some(PollValue::Single(_)) => self.issue(item, RequestKind::Read, origin),
            Some(PollValue::Many(_)) => self.reject(
                RequestKind::Read,
                PollError::config("Read length must be a single quantity"),
                origin,
            ),
            None => self.reject(
                RequestKind::Read,
                PollError::config("Read length is not defined"),
                origin,
            ),
        }
    }

    fn write(&mut self, item: PollItem, origin: Origin) {
        self.issue(item, RequestKind::Write, origin);
    }

    /// Resolve the function code and device id, then submit to the transport.
    fn issue(&mut self, mut item: PollItem, kind: RequestKind, origin: Origin) {
        let function = match item.function_code() {
            Ok(function) => function,
            Err(e) => return self.reject(kind, e, origin),
        };

        let value = match item.value.clone() {
            Some(value) => value,
            None if function == FunctionCode::ReadDeviceIdentification => {
                PollValue::Single(1)
            }
            None => {
                let error = PollError::config(format!("{} requires a value", function));
                return self.reject(kind, error, origin);
            }
        };

        let device_id = item.id.unwrap_or_else(|| self.transport.device_id());
        item.id = Some(device_id);
        item.fc = Some(function.to_string());
        item.value = Some(value.clone());

        let request = self.next_request();
        trace!(request = %request, fc = %function, device_id, address = item.address, "Submitting request");

        let modbus_request = ModbusRequest {
            function,
            device_id,
            address: item.address,
            value,
        };
        self.in_flight.insert(
            request,
            InFlight {
                pending: Pending::Request { kind, item },
                origin,
            },
        );

        let commands = self.commands.clone();
        let reply = Reply::from_fn(request, move |completion| {
            send(&commands, Command::Completed(completion));
        });
        self.transport.submit(modbus_request, reply);
    }

    /// Fail an action before it reaches the transport.
    fn reject(&mut self, kind: RequestKind, error: PollError, origin: Origin) {
        debug!(error = %error, "Request rejected");
        self.transition(kind.fail());
        self.bus.emit_error(error.clone());
        origin.fail(error);
    }

    fn close(&mut self, reply: oneshot::Sender<Result<()>>) {
        let transport = self.transport.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = transport.close().await;
            send(&commands, Command::Closed { result, reply });
        });
    }

    // ---------------------------------------------------------------------
    // Completions
    // ---------------------------------------------------------------------

    /// Take the in-flight entry for `request`, or `None` if it was already
    /// resolved or belongs to a pass that has been stopped.
    fn claim(&mut self, request: RequestId) -> Option<InFlight> {
        let entry = self.in_flight.remove(&request)?;
        if let Origin::Pass(pass) = entry.origin {
            if pass != self.pass || !self.is_polling() {
                debug!(request = %request, pass, "Dropping completion from a stopped pass");
                return None;
            }
        }
        Some(entry)
    }

    fn on_connected(&mut self, request: RequestId, result: std::result::Result<(), TransportError>) {
        let Some(entry) = self.claim(request) else {
            return;
        };
        let Pending::Connect { kind, link } = entry.pending else {
            return;
        };

        match result {
            Ok(()) => {
                info!(kind = %kind, host = %link.host, "Connected");
                self.transition(EngineState::GoodConnect);
                self.bus.emit(EngineEvent::Connect { kind, config: link });
                if let Origin::Link(tx) = entry.origin {
                    let _ = tx.send(Ok(()));
                }
            }
            Err(e) => {
                warn!(kind = %kind, host = %link.host, error = %e, "Connect failed");
                let error = PollError::Transport(e);
                self.transition(EngineState::FailConnect);
                self.bus.emit_error(error.clone());
                entry.origin.fail(error);
            }
        }
    }

    fn on_completed(&mut self, completion: Completion) {
        let Completion { request, result } = completion;

        if !self.in_flight.contains_key(&request) {
            // Already resolved: surface trailing errors, never re-transition.
            match result {
                Err(e) => {
                    debug!(request = %request, error = %e, "Late error for a resolved request");
                    self.bus.emit_error(PollError::Transport(e));
                }
                Ok(_) => trace!(request = %request, "Duplicate response ignored"),
            }
            return;
        }

        let Some(entry) = self.claim(request) else {
            return;
        };
        let Pending::Request { kind, item } = entry.pending else {
            return;
        };

        match result {
            Ok(response) => {
                trace!(request = %request, address = item.address, "Request succeeded");
                let data = ModbusData {
                    created_at: Utc::now(),
                    request: item,
                    response,
                };
                self.transition(kind.good());
                self.bus.emit(EngineEvent::Data(data.clone()));
                if let Origin::Request(tx) = entry.origin {
                    let _ = tx.send(Ok(data));
                }
            }
            Err(e) => {
                debug!(request = %request, address = item.address, error = %e, "Request failed");
                let error = PollError::Transport(e);
                self.transition(kind.fail());
                self.bus.emit_error(error.clone());
                entry.origin.fail(error);
            }
        }
    }

    fn on_closed(
        &mut self,
        result: std::result::Result<(), TransportError>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        match result {
            Ok(()) => {
                info!("Connection closed");
                self.transition(EngineState::Closed);
                self.bus.emit(EngineEvent::Close);
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                let error = PollError::Transport(e);
                self.bus.emit_error(error.clone());
                let _ = reply.send(Err(error));
            }
        }
    }

    fn next_timer(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    fn next_request(&mut self) -> RequestId {
        self.next_request_id += 1;
        RequestId(self.next_request_id)
    }
}

/// Post a command to the engine if it is still alive.
fn send(commands: &mpsc::WeakUnboundedSender<Command>, command: Command) -> bool {
    match commands.upgrade() {
        Some(tx) => tx.send(command).is_ok(),
        None => false,
    }
}

/// Cloneable front end to an engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    bus: EventBus,
    transport: Arc<dyn Transport>,
}

impl EngineHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| PollError::EngineStopped)?;
        rx.await.map_err(|_| PollError::EngineStopped)
    }

    /// Replace the configuration. Refused while a pass is running or if the
    /// new settings do not validate.
    pub async fn init(&self, config: EngineConfig) -> Result<()> {
        self.call(|tx| Command::Init(config, tx)).await?
    }

    /// Install the poll list used by subsequent passes.
    pub async fn install(&self, items: Vec<PollItem>) -> Result<()> {
        self.call(|tx| Command::Install(items, tx)).await?
    }

    /// Open the link, with the configured settings unless `link` is given.
    pub async fn connect(&self, link: Option<ConnectionConfig>) -> Result<()> {
        self.call(|tx| Command::Connect(link, tx)).await?
    }

    pub async fn close(&self) -> Result<()> {
        self.call(Command::Close).await?
    }

    /// Issue a single read. Only FC1-FC4 are accepted; `length` becomes
    /// the requested quantity.
    pub async fn read(&self, item: PollItem) -> Result<ModbusData> {
        self.call(|tx| Command::Read(item, tx)).await?
    }

    /// Issue a single request with any supported function code.
    pub async fn write(&self, item: PollItem) -> Result<ModbusData> {
        self.call(|tx| Command::Write(item, tx)).await?
    }

    /// Run one pass over the installed poll list.
    pub async fn start_polling(&self) -> Result<()> {
        self.call(Command::StartPolling).await?
    }

    /// Stop the running pass, if any. Always publishes `polling-stop`.
    pub async fn stop_polling(&self) -> Result<()> {
        self.call(Command::StopPolling).await?
    }

    /// Start a pass every monitor interval, skipping beats that overlap.
    /// A zero interval is a configuration error.
    pub async fn start_monitor(&self) -> Result<()> {
        self.call(Command::StartMonitor).await?
    }

    /// Stop the monitor and any running pass.
    pub async fn stop_monitor(&self) -> Result<()> {
        self.call(Command::StopMonitor).await?
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.call(Command::Snapshot).await
    }

    /// Stop the engine task. Pending timers are cancelled.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Register an event listener.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, listener);
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn device_id(&self) -> u8 {
        self.transport.device_id()
    }

    pub fn set_device_id(&self, id: u8) {
        self.transport.set_device_id(id);
    }

    pub fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.transport.set_timeout(timeout);
    }

    /// Names of the recognised connection types.
    pub fn connection_types() -> Vec<&'static str> {
        ConnectionKind::ALL.into_iter().map(ConnectionKind::label).collect()
    }
}

//! Framed messaging with one device, plus dispatch of inbound messages by namespace.

use crate::{
    codec::CastMessageCodec,
    message::CastMessage,
    payload::{self, PayloadDyn},
    Result,
    types::{EndpointId, EndpointIdConst, Namespace, NamespaceConst},
    util::named,
};
use anyhow::{bail, format_err};
use futures::{
    SinkExt, Stream, StreamExt,
    stream::SplitSink,
};
use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug},
    pin::Pin,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::codec::Framed;

pub use crate::transport::{BoxedStream, TokioAsyncStream};

pub const DEFAULT_SENDER_ID: EndpointIdConst = "sender-0";
pub const DEFAULT_RECEIVER_ID: EndpointIdConst = "receiver-0";

/// Duration for the task to do something locally.
const LOCAL_TASK_COMMAND_TIMEOUT: Duration = Duration::from_millis(1_000);

const DATA_BUFFER_LEN: usize = 64 * 1024;

const TASK_CMD_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// `EndpointId` used as the sender, and source of messages we send.
    ///
    /// Set `None` for the default, or `Some(a)` will override it.
    pub sender: Option<EndpointId>,

    /// Longest wait for the next inbound frame before the connection is considered dead.
    ///
    /// Devices send a heartbeat PING every 5 seconds.
    pub read_timeout: Duration,

    /// Longest wait for one frame to be written and flushed.
    pub write_timeout: Duration,
}

/// Receives every inbound message on one namespace.
///
/// Called on the channel task, so implementations must not block. A returned message is
/// written to the device before the next inbound frame is read.
pub trait MessageHandler: Send + Sync {
    fn namespace(&self) -> NamespaceConst;

    fn on_message(&self, msg: &CastMessage) -> Option<CastMessage>;
}

/// A framed connection to one device.
///
/// Owns a background task that reads and dispatches inbound frames and performs every write,
/// so frames never interleave.
pub struct MessageChannel {
    /// Some(_) until `.close()` is called.
    task_join_handle: Option<JoinHandle<()>>,

    task_cmd_tx: mpsc::Sender<TaskCmd>,

    destinations: Mutex<HashSet<EndpointId>>,

    shared: Arc<Shared>,
}

/// Data shared between `MessageChannel` and its `Task`.
struct Shared {
    config: ChannelConfig,
    connected: AtomicBool,
    handlers: RwLock<HashMap<Namespace, Vec<Arc<dyn MessageHandler>>>>,
}

struct Task {
    conn_framed_sink: SplitSink<Framed<BoxedStream, CastMessageCodec>, CastMessage>,
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct TaskCmd {
    command: TaskCmdType,
    result_tx: oneshot::Sender<Result<()>>,
}

#[derive(Debug)]
enum TaskCmdType {
    Send(Box<CastMessage>),
    Shutdown,
}

#[derive(Debug)]
enum TaskEvent {
    Cmd(TaskCmd),
    CmdClosed,
    MessageRead(Result<CastMessage>),
    ReadTimeout,
    ReadClosed,
}

/// Replies PONG to every message on the heartbeat namespace.
#[derive(Debug)]
pub struct HeartbeatHandler {
    sender: EndpointId,
}

/// Accepts connection namespace messages.
#[derive(Debug, Default)]
pub struct ConnectionHandler;

impl Default for ChannelConfig {
    fn default() -> ChannelConfig {
        ChannelConfig {
            sender: None,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl ChannelConfig {
    pub fn sender(&self) -> EndpointId {
        self.sender.as_ref()
            .cloned()
            .unwrap_or_else(|| DEFAULT_SENDER_ID.to_string())
    }
}

impl MessageChannel {
    /// Start the channel task on `conn` and send CONNECT to the platform receiver.
    ///
    /// The built-in handlers and then `handlers` are registered before the task starts, so
    /// they see every message the device sends.
    #[named]
    pub async fn open(conn: BoxedStream,
                      config: ChannelConfig,
                      handlers: impl IntoIterator<Item = Arc<dyn MessageHandler>>)
    -> Result<MessageChannel>
    {
        const METHOD_PATH: &str = method_path!("MessageChannel");

        let (task_cmd_tx, task_cmd_rx) = mpsc::channel(TASK_CMD_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            config,
            connected: AtomicBool::new(true),
            handlers: RwLock::new(HashMap::new()),
        });

        let mut channel = MessageChannel {
            task_join_handle: None,
            task_cmd_tx,
            destinations: Mutex::new(HashSet::new()),
            shared: Arc::clone(&shared),
        };

        channel.add_callback(Arc::new(HeartbeatHandler { sender: shared.config.sender() }));
        channel.add_callback(Arc::new(ConnectionHandler));
        for handler in handlers {
            channel.add_callback(handler);
        }

        let conn_framed = Framed::with_capacity(conn, CastMessageCodec, DATA_BUFFER_LEN);
        let (conn_framed_sink, conn_framed_stream) = conn_framed.split();

        let read_timeout = shared.config.read_timeout;
        let reads = tokio_stream::StreamExt::timeout(conn_framed_stream, read_timeout)
            .map(|res| match res {
                Ok(read_res) => TaskEvent::MessageRead(read_res),
                Err(_elapsed) => TaskEvent::ReadTimeout,
            })
            .chain(futures::stream::once(futures::future::ready(TaskEvent::ReadClosed)));

        let cmds = tokio_stream::wrappers::ReceiverStream::new(task_cmd_rx)
            .map(TaskEvent::Cmd)
            .chain(futures::stream::once(futures::future::ready(TaskEvent::CmdClosed)));

        let task = Task {
            conn_framed_sink,
            shared,
        };

        channel.task_join_handle = Some(tokio::spawn(task.main(Box::pin(cmds), Box::pin(reads))));

        tracing::debug!(target: METHOD_PATH,
                        sender = channel.config().sender(),
                        "channel task started");

        channel.add_destination(DEFAULT_RECEIVER_ID).await?;

        Ok(channel)
    }

    /// Queue `msg` to be written, and wait until it has been flushed to the device.
    #[named]
    pub async fn send(&self, msg: CastMessage) -> Result<()> {
        const METHOD_PATH: &str = method_path!("MessageChannel");

        if !self.is_connected() {
            bail!("{METHOD_PATH}: channel disconnected\n\
                   _ namespace   = {ns}\n\
                   _ destination = {dst}",
                  ns = msg.namespace,
                  dst = msg.destination);
        }

        let command_timeout = LOCAL_TASK_COMMAND_TIMEOUT + self.config().write_timeout;

        self.task_cmd(TaskCmdType::Send(Box::new(msg)), command_timeout).await
    }

    /// Send CONNECT to `destination` the first time it is used on this channel.
    #[named]
    pub async fn add_destination(&self, destination: impl Into<EndpointId>) -> Result<()> {
        let destination = destination.into();

        let added = self.destinations.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(destination.clone());
        if !added {
            return Ok(());
        }

        tracing::debug!(target: method_path!("MessageChannel"),
                        destination,
                        "connect to destination");

        let msg = payload::request_message(payload::connection::ConnectRequest {},
                                           None,
                                           self.config().sender(),
                                           destination.clone())?;

        let res = self.send(msg).await;
        if res.is_err() {
            self.destinations.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&destination);
        }

        res
    }

    /// Register `handler` for its namespace, after any handlers already registered there.
    pub fn add_callback(&self, handler: Arc<dyn MessageHandler>) {
        let ns = handler.namespace().to_string();

        self.shared.handlers.write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(ns)
            .or_default()
            .push(handler);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Stop the channel task, which closes the connection, and wait for it to exit.
    #[named]
    pub async fn close(mut self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("MessageChannel");

        let Some(join_handle) = self.task_join_handle.take() else {
            return Ok(());
        };

        if !join_handle.is_finished() {
            if let Err(err) = self.task_cmd(TaskCmdType::Shutdown,
                                            LOCAL_TASK_COMMAND_TIMEOUT).await {
                // The task may have exited on its own in the meantime.
                tracing::debug!(target: METHOD_PATH,
                                ?err,
                                "shutdown command not delivered");
            }
        }

        self.shared.connected.store(false, Ordering::SeqCst);

        tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT, join_handle).await??;

        Ok(())
    }

    async fn task_cmd(&self, command: TaskCmdType, command_timeout: Duration) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel::<Result<()>>();

        let cmd = TaskCmd {
            command,
            result_tx,
        };

        self.task_cmd_tx.send_timeout(cmd, LOCAL_TASK_COMMAND_TIMEOUT).await
            .map_err(|err| format_err!("MessageChannel::task_cmd: channel task gone: {err}"))?;

        tokio::time::timeout(command_timeout, result_rx).await???;

        Ok(())
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Some(join_handle) = self.task_join_handle.take() {
            tracing::debug!("MessageChannel: dropped without close, aborting task");
            join_handle.abort();
        }
    }
}

impl Debug for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MessageChannel")
         .field("config", &self.shared.config)
         .field("connected", &self.is_connected())
         .field("task", if self.task_join_handle.is_some() { &"Some" } else { &"None" })
         .finish_non_exhaustive()
    }
}

type EventStream = Pin<Box<dyn Stream<Item = TaskEvent> + Send>>;

impl Task {
    #[named]
    async fn main(mut self, cmds: EventStream, reads: EventStream) {
        const METHOD_PATH: &str = method_path!("Task");

        let events = futures_concurrency::stream::Merge::merge((cmds, reads));
        tokio::pin!(events);

        while let Some(event) = events.next().await {
            tracing::trace!(target: METHOD_PATH,
                            ?event,
                            "event");

            match event {
                TaskEvent::Cmd(TaskCmd { command, result_tx }) => match command {
                    TaskCmdType::Send(msg) => {
                        let res = self.write(*msg).await;
                        let failed = res.is_err();
                        respond(result_tx, res);
                        if failed {
                            break;
                        }
                    },

                    TaskCmdType::Shutdown => {
                        tracing::debug!(target: METHOD_PATH,
                                        "shutdown on command");
                        respond(result_tx, Ok(()));
                        break;
                    },
                },

                TaskEvent::CmdClosed => {
                    tracing::debug!(target: METHOD_PATH,
                                    "shutdown on command channel closed");
                    break;
                },

                TaskEvent::MessageRead(Ok(msg)) => {
                    if let Err(err) = self.dispatch(msg).await {
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "reply write error");
                        break;
                    }
                },

                TaskEvent::MessageRead(Err(err)) => {
                    tracing::warn!(target: METHOD_PATH,
                                   ?err,
                                   "message read error");
                    break;
                },

                TaskEvent::ReadTimeout => {
                    tracing::warn!(target: METHOD_PATH,
                                   read_timeout = ?self.shared.config.read_timeout,
                                   "read timeout");
                    break;
                },

                TaskEvent::ReadClosed => {
                    tracing::info!(target: METHOD_PATH,
                                   "connection closed by device");
                    break;
                },
            }
        }

        self.shared.connected.store(false, Ordering::SeqCst);

        if let Ok(Err(err)) = tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT,
                                                   self.conn_framed_sink.close()).await {
            tracing::debug!(target: METHOD_PATH,
                            ?err,
                            "error closing connection");
        }

        tracing::debug!(target: METHOD_PATH,
                        "channel task exit");
    }

    #[named]
    async fn write(&mut self, msg: CastMessage) -> Result<()> {
        let is_heartbeat = msg.namespace == payload::heartbeat::CHANNEL_NAMESPACE;
        if is_heartbeat {
            tracing::trace!(target: method_path!("Task"),
                            ?msg, payload = msg.payload_str(),
                            "msg send");
        } else {
            tracing::debug!(target: method_path!("Task"),
                            ?msg, payload = msg.payload_str(),
                            "msg send");
        }

        let write_timeout = self.shared.config.write_timeout;
        tokio::time::timeout(write_timeout, self.conn_framed_sink.send(msg)).await??;

        Ok(())
    }

    /// Run every handler registered for the message namespace, writing their replies.
    #[named]
    async fn dispatch(&mut self, msg: CastMessage) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Task");

        if msg.namespace == payload::heartbeat::CHANNEL_NAMESPACE {
            tracing::trace!(target: METHOD_PATH,
                            ?msg, payload = msg.payload_str(),
                            "message read");
        } else {
            tracing::debug!(target: METHOD_PATH,
                            ?msg, payload = msg.payload_str(),
                            "message read");
        }

        let handlers: Vec<Arc<dyn MessageHandler>> =
            self.shared.handlers.read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&msg.namespace)
                .cloned()
                .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!(target: METHOD_PATH,
                            namespace = msg.namespace,
                            "no handler for namespace");
            return Ok(());
        }

        for handler in handlers {
            if let Some(reply) = handler.on_message(&msg) {
                self.write(reply).await?;
            }
        }

        Ok(())
    }
}

fn respond(result_tx: oneshot::Sender<Result<()>>, result: Result<()>) {
    let result_variant = if result.is_ok() { "Ok"  }
                         else              { "Err" };

    if result_tx.send(result).is_err() {
        tracing::debug!(result_variant,
                        "Task::respond: result channel dropped");
    }
}

impl MessageHandler for HeartbeatHandler {
    fn namespace(&self) -> NamespaceConst {
        payload::heartbeat::CHANNEL_NAMESPACE
    }

    #[named]
    fn on_message(&self, msg: &CastMessage) -> Option<CastMessage> {
        let res = payload::request_message(payload::heartbeat::Pong {},
                                           None,
                                           self.sender.clone(),
                                           msg.source.clone());
        match res {
            Ok(pong) => Some(pong),
            Err(err) => {
                tracing::error!(target: method_path!("HeartbeatHandler"),
                                ?err,
                                "error building pong");
                None
            },
        }
    }
}

impl MessageHandler for ConnectionHandler {
    fn namespace(&self) -> NamespaceConst {
        payload::connection::CHANNEL_NAMESPACE
    }

    #[named]
    fn on_message(&self, msg: &CastMessage) -> Option<CastMessage> {
        if let Ok(pd) = PayloadDyn::from_message(msg) {
            if pd.typ == payload::connection::MESSAGE_TYPE_CLOSE {
                tracing::debug!(target: method_path!("ConnectionHandler"),
                                source = msg.source,
                                "connection closed by destination");
            }
        }
        None
    }
}

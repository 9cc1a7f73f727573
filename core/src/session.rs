use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use opsync_protocol::CommandOperationData;
use opsync_protocol::FileOperationData;
use opsync_protocol::RawFrame;
use opsync_transport::ConnectionStatus;
use opsync_transport::FrameStream;
use opsync_transport::StreamingClient;
use opsync_transport::TransportError;
use opsync_transport::TransportEvent;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::CommandCompletion;
use crate::CommandExecutor;
use crate::CommandQueue;
use crate::CommandRequest;
use crate::MessageSnapshot;
use crate::OperationContext;
use crate::OperationHandler;
use crate::OperationParser;
use crate::ParseError;
use crate::ParserStats;
use crate::SyncConfig;
use crate::UserIdentity;
use crate::VirtualFileStore;
use crate::WorkspacePathResolver;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The bundled [`OperationHandler`]: applies file events to the
/// [`VirtualFileStore`] and defers `cmd` events to the [`CommandQueue`].
///
/// Store mutations happen inline (they are in-memory and cheap) while
/// command execution is serialized off the parse path, so a long-running
/// command never delays the next frame.
pub struct WorkspaceHandler {
    store: Arc<Mutex<VirtualFileStore>>,
    queue: Arc<CommandQueue>,
    resolver: WorkspacePathResolver,
    tx_error: mpsc::UnboundedSender<ParseError>,
}

impl WorkspaceHandler {
    pub fn new(
        store: Arc<Mutex<VirtualFileStore>>,
        queue: Arc<CommandQueue>,
        resolver: WorkspacePathResolver,
        tx_error: mpsc::UnboundedSender<ParseError>,
    ) -> Self {
        Self {
            store,
            queue,
            resolver,
            tx_error,
        }
    }

    fn resolve(&self, data: &FileOperationData) -> String {
        self.resolver.extract_file_path(&data.file_path).to_string()
    }
}

#[async_trait]
impl OperationHandler for WorkspaceHandler {
    async fn on_add_start(
        &self,
        _ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let path = self.resolve(data);
        let mut store = self.store.lock().await;
        store.create_file(path.clone(), data.content.clone());
        store.set_selected_path(Some(path));
        Ok(())
    }

    async fn on_add_progress(
        &self,
        _ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let path = self.resolve(data);
        let mut store = self.store.lock().await;
        store.update_content(&path, &data.content, false);
        store.set_selected_path(Some(path));
        Ok(())
    }

    async fn on_add_end(
        &self,
        _ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let path = self.resolve(data);
        self.store.lock().await.update_content(&path, &data.content, true);
        Ok(())
    }

    async fn on_edit_start(
        &self,
        _ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let path = self.resolve(data);
        self.store.lock().await.set_selected_path(Some(path));
        Ok(())
    }

    async fn on_edit_progress(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        self.on_add_progress(ctx, data).await
    }

    async fn on_edit_end(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        self.on_add_end(ctx, data).await
    }

    async fn on_delete_start(
        &self,
        _ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        trace!("delete pending for {}", data.file_path);
        Ok(())
    }

    async fn on_delete_progress(
        &self,
        _ctx: &OperationContext,
        _data: &FileOperationData,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_delete_end(
        &self,
        _ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let path = self.resolve(data);
        self.store.lock().await.delete_file(&path);
        Ok(())
    }

    async fn on_cmd(
        &self,
        ctx: &OperationContext,
        data: &CommandOperationData,
    ) -> anyhow::Result<()> {
        self.queue.push(CommandRequest {
            command: data.command.clone(),
            working_dir: data.working_dir.clone().map(PathBuf::from),
            env: data.env.clone(),
            message_id: ctx.message_id.clone(),
            operation_id: ctx.operation_id.clone(),
        });
        Ok(())
    }

    fn on_error(&self, error: &ParseError, _raw: Option<&RawFrame>) {
        let _ = self.tx_error.send(error.clone());
    }
}

/// One live sync session: transport → parser → {file store, command
/// queue}, with lifecycle.
///
/// Owns the frame loop and the staleness sweeper. Reconnects are
/// transparent: per-message parser state is deliberately kept across
/// them, and [`SyncSession::reset`] is the explicit new-conversation
/// boundary.
pub struct SyncSession {
    client: StdMutex<StreamingClient>,
    parser: Arc<Mutex<OperationParser>>,
    store: Arc<Mutex<VirtualFileStore>>,
    queue: Arc<CommandQueue>,
    active_message: Arc<StdMutex<Option<String>>>,
    status_rx: watch::Receiver<ConnectionStatus>,
    frame_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
    command_completions: Option<mpsc::UnboundedReceiver<CommandCompletion>>,
    parser_errors: Option<mpsc::UnboundedReceiver<ParseError>>,
}

impl SyncSession {
    /// Session over the unidirectional SSE binding.
    pub fn connect_sse(
        url: &str,
        config: SyncConfig,
        identity: Option<UserIdentity>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<Self, TransportError> {
        let (client, frames) = StreamingClient::sse(url, config.transport_config())?;
        Ok(Self::start(client, frames, &config, identity, executor))
    }

    /// Session over the bidirectional WebSocket binding.
    pub fn connect_websocket(
        url: &str,
        config: SyncConfig,
        identity: Option<UserIdentity>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<Self, TransportError> {
        let (client, frames) = StreamingClient::websocket(url, config.transport_config())?;
        Ok(Self::start(client, frames, &config, identity, executor))
    }

    fn start(
        mut client: StreamingClient,
        mut frames: FrameStream,
        config: &SyncConfig,
        identity: Option<UserIdentity>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let store = Arc::new(Mutex::new(VirtualFileStore::new()));
        let (queue, command_completions) = CommandQueue::new(executor);
        let queue = Arc::new(queue);
        let (tx_error, parser_errors) = mpsc::unbounded_channel();

        let handler = Arc::new(WorkspaceHandler::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            WorkspacePathResolver::new(identity),
            tx_error,
        ));
        let parser = Arc::new(Mutex::new(OperationParser::new(
            config.parser_config(),
            handler,
        )));

        let status_rx = client.status();
        let active_message = Arc::new(StdMutex::new(None::<String>));
        client.connect();

        let frame_task = tokio::spawn({
            let parser = Arc::clone(&parser);
            let active_message = Arc::clone(&active_message);
            async move {
                while let Some(event) = frames.recv().await {
                    match event {
                        TransportEvent::Opened => {
                            // Reconnects keep message state; reset() is the
                            // conversation boundary, not the socket's.
                            debug!("channel open");
                        }
                        TransportEvent::Frame(frame) => {
                            let fallback = active_message
                                .lock()
                                .ok()
                                .and_then(|active| active.clone());
                            let mut parser = parser.lock().await;
                            parser.parse_frame(frame, fallback.as_deref()).await;
                        }
                        TransportEvent::Error(err) => {
                            warn!("transport error: {err}");
                        }
                        TransportEvent::Closed => break,
                    }
                }
            }
        });

        let sweep_task = tokio::spawn({
            let parser = Arc::clone(&parser);
            async move {
                let mut interval = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    interval.tick().await;
                    parser.lock().await.sweep_stale();
                }
            }
        });

        Self {
            client: StdMutex::new(client),
            parser,
            store,
            queue,
            active_message,
            status_rx,
            frame_task: Some(frame_task),
            sweep_task: Some(sweep_task),
            command_completions: Some(command_completions),
            parser_errors: Some(parser_errors),
        }
    }

    /// Message id applied to frames whose payload carries none: the
    /// assistant turn currently streaming.
    pub fn set_active_message(&self, message_id: impl Into<String>) {
        if let Ok(mut active) = self.active_message.lock() {
            *active = Some(message_id.into());
        }
    }

    /// Feeds one frame directly, bypassing the transport. Hosts that own
    /// their channel (or tests) use this as the `parse` entry point.
    pub async fn parse(&self, message_id: &str, frame: RawFrame) {
        self.parser.lock().await.parse(message_id, frame).await;
    }

    /// Clears all parser and file state for a new conversation. Already
    /// executed commands are history; nothing is undone.
    pub async fn reset(&self) {
        self.parser.lock().await.reset();
        self.store.lock().await.clear();
    }

    /// Drops tracking state for one message once the UI is done with it.
    pub async fn clear_message(&self, message_id: &str) {
        self.parser.lock().await.clear_message(message_id);
    }

    pub async fn message_state(&self, message_id: &str) -> Option<MessageSnapshot> {
        self.parser.lock().await.get_message_state(message_id)
    }

    pub async fn parser_stats(&self) -> ParserStats {
        self.parser.lock().await.stats()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Shared handle to the workspace file store.
    pub fn store(&self) -> Arc<Mutex<VirtualFileStore>> {
        Arc::clone(&self.store)
    }

    /// Shared handle to the command queue.
    pub fn command_queue(&self) -> Arc<CommandQueue> {
        Arc::clone(&self.queue)
    }

    /// Completion stream for executed commands. Yields `None` after the
    /// first call.
    pub fn take_command_completions(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<CommandCompletion>> {
        self.command_completions.take()
    }

    /// Parser error stream, for surfacing non-blocking notifications.
    /// Yields `None` after the first call.
    pub fn take_parser_errors(&mut self) -> Option<mpsc::UnboundedReceiver<ParseError>> {
        self.parser_errors.take()
    }

    /// Closes the transport and waits for the frame loop to drain.
    pub async fn shutdown(&mut self) {
        if let Ok(mut client) = self.client.lock() {
            client.close();
        }
        if let Some(task) = self.frame_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(task) = &self.frame_task {
            task.abort();
        }
        if let Some(task) = &self.sweep_task {
            task.abort();
        }
    }
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use opsync_core::CommandExecutor;
use opsync_core::CommandOutput;
use opsync_core::CommandQueue;
use opsync_core::CommandRequest;
use opsync_core::OperationParser;
use opsync_core::ParseError;
use opsync_core::ParserConfig;
use opsync_core::UserIdentity;
use opsync_core::VirtualFileStore;
use opsync_core::WorkspaceHandler;
use opsync_core::WorkspacePathResolver;
use opsync_protocol::RawFrame;
use pretty_assertions::assert_eq;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

struct NoopExecutor;

#[async_trait]
impl CommandExecutor for NoopExecutor {
    async fn execute(&self, _request: &CommandRequest) -> anyhow::Result<CommandOutput> {
        Ok(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        })
    }
}

struct Workspace {
    parser: OperationParser,
    store: Arc<Mutex<VirtualFileStore>>,
    errors: mpsc::UnboundedReceiver<ParseError>,
    _queue: Arc<CommandQueue>,
}

fn workspace(identity: Option<UserIdentity>) -> Workspace {
    workspace_with(identity, Arc::new(NoopExecutor))
}

fn workspace_with(
    identity: Option<UserIdentity>,
    executor: Arc<dyn CommandExecutor>,
) -> Workspace {
    let store = Arc::new(Mutex::new(VirtualFileStore::new()));
    let (queue, _completions) = CommandQueue::new(executor);
    let queue = Arc::new(queue);
    let (tx_error, errors) = mpsc::unbounded_channel();
    let handler = Arc::new(WorkspaceHandler::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        WorkspacePathResolver::new(identity),
        tx_error,
    ));
    Workspace {
        parser: OperationParser::new(ParserConfig::default(), handler),
        store,
        errors,
        _queue: queue,
    }
}

fn file_frame(event: &str, path: &str, operation_id: &str, content: &str) -> RawFrame {
    RawFrame::sse(
        event,
        format!(
            r#"{{"filePath":"{path}","content":"{content}","operationId":"{operation_id}"}}"#
        ),
    )
}

#[tokio::test]
async fn add_flow_accumulates_progress_then_end_is_authoritative() {
    let mut ws = workspace(None);
    ws.parser
        .parse("m1", file_frame("add-start", "x.js", "op1", ""))
        .await;
    ws.parser
        .parse("m1", file_frame("add-progress", "x.js", "op1", "ab"))
        .await;
    ws.parser
        .parse("m1", file_frame("add-progress", "x.js", "op1", "cd"))
        .await;

    {
        let store = ws.store.lock().await;
        assert_eq!(store.file("x.js"), Some("abcd"));
        assert_eq!(store.selected_path(), Some("x.js"));
    }

    ws.parser
        .parse("m1", file_frame("add-end", "x.js", "op1", "FINAL"))
        .await;
    assert_eq!(ws.store.lock().await.file("x.js"), Some("FINAL"));
}

#[tokio::test]
async fn streamed_file_matches_terminal_content_exactly() {
    let mut ws = workspace(None);
    ws.parser
        .parse("m1", file_frame("add-start", "x.js", "op1", ""))
        .await;
    ws.parser
        .parse(
            "m1",
            file_frame("add-progress", "x.js", "op1", "console.log(1)"),
        )
        .await;
    ws.parser
        .parse(
            "m1",
            file_frame("add-end", "x.js", "op1", "console.log(1);"),
        )
        .await;

    assert_eq!(ws.store.lock().await.file("x.js"), Some("console.log(1);"));
    assert!(ws.errors.try_recv().is_err());
}

#[tokio::test]
async fn edit_progress_appends_and_edit_end_replaces() {
    let mut ws = workspace(None);
    ws.parser
        .parse("m1", file_frame("add-end", "a.txt", "op1", "seed"))
        .await;
    ws.parser
        .parse("m2", file_frame("edit-start", "a.txt", "op2", ""))
        .await;
    ws.parser
        .parse("m2", file_frame("edit-progress", "a.txt", "op2", "+1"))
        .await;
    assert_eq!(ws.store.lock().await.file("a.txt"), Some("seed+1"));

    ws.parser
        .parse("m2", file_frame("edit-end", "a.txt", "op2", "rewritten"))
        .await;
    assert_eq!(ws.store.lock().await.file("a.txt"), Some("rewritten"));
}

#[tokio::test]
async fn delete_of_missing_path_is_silent() {
    let mut ws = workspace(None);
    ws.parser
        .parse("m1", file_frame("add-end", "keep.txt", "op1", "1"))
        .await;
    ws.parser
        .parse("m1", file_frame("delete-end", "gone.txt", "op2", ""))
        .await;

    let store = ws.store.lock().await;
    assert_eq!(store.len(), 1);
    assert_eq!(store.file("keep.txt"), Some("1"));
    drop(store);
    assert!(ws.errors.try_recv().is_err());
}

#[tokio::test]
async fn delete_flow_removes_the_file() {
    let mut ws = workspace(None);
    ws.parser
        .parse("m1", file_frame("add-end", "tmp.txt", "op1", "x"))
        .await;
    ws.parser
        .parse("m1", file_frame("delete-start", "tmp.txt", "op2", ""))
        .await;
    // Still present until the terminal event.
    assert_eq!(ws.store.lock().await.len(), 1);

    ws.parser
        .parse("m1", file_frame("delete-end", "tmp.txt", "op2", ""))
        .await;
    assert!(ws.store.lock().await.is_empty());
}

#[tokio::test]
async fn server_paths_are_workspace_resolved() {
    let mut ws = workspace(Some(UserIdentity {
        user_type: "sys_user".to_string(),
        id: 42,
    }));
    ws.parser
        .parse(
            "m1",
            file_frame(
                "add-end",
                "workspace/sys_user_42/src/app.js",
                "op1",
                "content",
            ),
        )
        .await;

    let store = ws.store.lock().await;
    assert_eq!(store.file("src/app.js"), Some("content"));
    assert_eq!(store.file("workspace/sys_user_42/src/app.js"), None);
}

/// Executor that records command order and forbids overlap.
struct SerialProbe {
    log: StdMutex<Vec<String>>,
    busy: StdMutex<bool>,
}

#[async_trait]
impl CommandExecutor for SerialProbe {
    async fn execute(&self, request: &CommandRequest) -> anyhow::Result<CommandOutput> {
        {
            let mut busy = self.busy.lock().unwrap();
            assert!(!*busy, "commands overlapped");
            *busy = true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.log.lock().unwrap().push(request.command.clone());
        *self.busy.lock().unwrap() = false;
        Ok(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(20),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn cmd_events_run_strictly_in_order() {
    let probe = Arc::new(SerialProbe {
        log: StdMutex::new(Vec::new()),
        busy: StdMutex::new(false),
    });
    let mut ws = workspace_with(None, probe.clone());

    for (op, command) in [("op1", "a"), ("op2", "b"), ("op3", "c")] {
        ws.parser
            .parse(
                "m1",
                RawFrame::sse(
                    "cmd",
                    format!(r#"{{"command":"{command}","operationId":"{op}"}}"#),
                ),
            )
            .await;
    }

    // Three sleeps of 20ms each, drained serially.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*probe.log.lock().unwrap(), vec!["a", "b", "c"]);
}

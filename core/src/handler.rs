use async_trait::async_trait;
use opsync_protocol::CommandOperationData;
use opsync_protocol::EventName;
use opsync_protocol::FileOperationData;
use opsync_protocol::RawFrame;

use crate::error::ParseError;

/// Identity of the event being dispatched, passed to every callback.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub event: EventName,
    pub message_id: String,
    pub operation_id: String,
}

/// Callback surface invoked by the parser, exactly once per accepted
/// event, in arrival order.
///
/// Implementations must return quickly: the parser awaits each callback
/// before accepting the next frame, so long-running work (command
/// execution, slow storage) belongs on a queue, the way
/// [`WorkspaceHandler`](crate::WorkspaceHandler) defers `cmd` events.
/// An `Err` is caught at the dispatch boundary and reported through
/// [`OperationHandler::on_error`] as a side-effect failure; it never
/// stalls the stream.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn on_add_start(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_add_progress(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_add_end(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_edit_start(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_edit_progress(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_edit_end(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_delete_start(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_delete_progress(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_delete_end(
        &self,
        ctx: &OperationContext,
        data: &FileOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    async fn on_cmd(
        &self,
        ctx: &OperationContext,
        data: &CommandOperationData,
    ) -> anyhow::Result<()> {
        let _ = (ctx, data);
        Ok(())
    }

    /// Parser-internal errors and caught side-effect failures. The
    /// original frame is attached when one is available.
    fn on_error(&self, error: &ParseError, raw: Option<&RawFrame>) {
        let _ = (error, raw);
    }
}

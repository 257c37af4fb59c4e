//! Approval gate for agent tools
//!
//! [`RequireApproval`] wraps any [`ToolFunction`] so the wrapped function only
//! runs after a human approves the exact arguments. A denial is not an error:
//! the wrapped call returns a message the agent can read and react to.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use hitl_common::{ContactChannel, Decision, FunctionCallSpec, ResponseOption};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stderr, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::client::ApprovalClient;
use crate::error::{ApprovalError, Result};

/// A function an agent may invoke with untyped JSON arguments
#[async_trait]
pub trait ToolFunction: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn description(&self) -> String {
        String::new()
    }

    async fn call(&self, args: Value) -> anyhow::Result<String>;
}

/// Something that can obtain a human decision for a proposed call
#[async_trait]
pub trait Approver: Send + Sync {
    async fn request_approval(
        &self,
        spec: FunctionCallSpec,
        cancel: &CancellationToken,
    ) -> Result<Decision>;
}

#[async_trait]
impl Approver for ApprovalClient {
    async fn request_approval(
        &self,
        spec: FunctionCallSpec,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        self.fetch_approval(spec, cancel).await
    }
}

/// Asks on a local terminal instead of the remote service.
///
/// An empty line approves; any other text denies and is passed back as the
/// comment.
pub struct ConsoleApprover<R, W> {
    io: Mutex<(R, W)>,
}

impl ConsoleApprover<BufReader<Stdin>, Stderr> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl<R, W> ConsoleApprover<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

#[async_trait]
impl<R, W> Approver for ConsoleApprover<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request_approval(
        &self,
        spec: FunctionCallSpec,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;

        let prompt = format!(
            "allow {} with args {}?\npress ENTER to approve, or type feedback to deny: ",
            spec.fn_name,
            Value::Object(spec.kwargs.clone())
        );
        let io_error = |e: std::io::Error| ApprovalError::Transport {
            url: "console".to_string(),
            message: e.to_string(),
            timeout: false,
            source: Some(Box::new(e)),
        };
        writer.write_all(prompt.as_bytes()).await.map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;

        let mut line = String::new();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApprovalError::Cancelled),
            read = reader.read_line(&mut line) => read.map_err(io_error)?,
        };
        if read == 0 {
            return Err(ApprovalError::Cancelled);
        }

        let feedback = line.trim();
        if feedback.is_empty() {
            Ok(Decision::approve(None))
        } else {
            Ok(Decision::deny(feedback))
        }
    }
}

/// A tool that must be approved before each invocation
pub struct RequireApproval<T> {
    tool: T,
    approver: Arc<dyn Approver>,
    channel: Option<ContactChannel>,
    reject_options: Option<Vec<ResponseOption>>,
    cancel: CancellationToken,
}

impl<T: Debug> Debug for RequireApproval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequireApproval")
            .field("tool", &self.tool)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Gate `tool` behind `approver`, notifying `channel` (or the approver's default)
pub fn wrap_with_approval<T: ToolFunction>(
    tool: T,
    approver: Arc<dyn Approver>,
    channel: Option<ContactChannel>,
) -> RequireApproval<T> {
    RequireApproval {
        tool,
        approver,
        channel,
        reject_options: None,
        cancel: CancellationToken::new(),
    }
}

impl ApprovalClient {
    /// Gate `tool` behind this client's remote approvals
    pub fn require_approval<T: ToolFunction>(
        &self,
        tool: T,
        channel: Option<ContactChannel>,
    ) -> RequireApproval<T> {
        wrap_with_approval(tool, Arc::new(self.clone()), channel)
    }
}

impl<T: ToolFunction> RequireApproval<T> {
    pub fn with_reject_options(mut self, options: Vec<ResponseOption>) -> Self {
        self.reject_options = Some(options);
        self
    }

    /// Abort pending approvals when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn inner(&self) -> &T {
        &self.tool
    }

    fn spec_for(&self, kwargs: Map<String, Value>) -> FunctionCallSpec {
        FunctionCallSpec {
            fn_name: self.tool.name().to_string(),
            kwargs,
            channel: self.channel.clone(),
            reject_options: self.reject_options.clone(),
            state: None,
        }
    }
}

#[async_trait]
impl<T: ToolFunction> ToolFunction for RequireApproval<T> {
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn description(&self) -> String {
        self.tool.description()
    }

    #[instrument(skip_all, fields(fn_name = %self.tool.name()))]
    async fn call(&self, args: Value) -> anyhow::Result<String> {
        let kwargs = match &args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => anyhow::bail!(
                "arguments for {} must be a JSON object, got {}",
                self.tool.name(),
                other
            ),
        };

        let decision = self
            .approver
            .request_approval(self.spec_for(kwargs), &self.cancel)
            .await?;

        if decision.approved {
            info!("{} approved, running", self.tool.name());
            return self.tool.call(args).await;
        }

        info!("{} denied", self.tool.name());
        Ok(format!(
            "User denied {} with message: {}",
            self.tool.name(),
            decision.comment.as_deref().unwrap_or_default()
        ))
    }
}

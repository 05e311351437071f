//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The operation completion contract.
//!
//! Every non-blocking operation takes a [`TransportOperation`] descriptor and
//! returns an [`OperationStatus`]:
//!
//! - [`OperationStatus::Completed`]: the outcome was known before the call
//!   returned. The descriptor comes back with `completed_synchronously` set
//!   and its callback is **not** invoked.
//! - [`OperationStatus::Pending`]: the operation continues on the runtime.
//!   The descriptor's callback is invoked exactly once, later, possibly on
//!   another thread.
//!
//! Internally each operation is a single future. [`drive`] polls it once on
//! the calling thread; only if that poll does not finish is the future
//! handed to the runtime. A chain of steps that all complete eagerly is
//! therefore a loop inside one poll, not a chain of nested callbacks.
//!
//! # Timeouts
//!
//! A pending operation may carry one timeout. The timer and the operation
//! race on a [`CompletionFlag`]; whichever sets it first delivers the
//! callback. A timer that wins aborts the operation's task, which drops the
//! transport underneath the pending I/O, and completes the descriptor with
//! [`AmqpError::Timeout`]. A result that arrives after the timer won is
//! discarded.
//!
//! # Example
//!
//! ```rust
//! use amqp_transport::operation::{self, OperationStatus, TransportOperation};
//! use amqp_transport::transport::MemoryTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (client, _server) = MemoryTransport::pair(1024);
//!
//! let op = TransportOperation::new(|op| println!("completed later: {:?}", op.error))
//!     .with_transport(Box::new(client))
//!     .with_single(bytes::BytesMut::from(&b"AMQP\x00\x01\x00\x00"[..]));
//!
//! match operation::write(op, None) {
//!     OperationStatus::Completed(op) => assert!(op.completed_synchronously),
//!     OperationStatus::Pending => println!("callback will fire"),
//! }
//! # }
//! ```

use crate::error::AmqpError;
use crate::protocol::ProtocolHeader;
use crate::transport::{BoxedTransport, TransportError};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Callback invoked when an operation completes asynchronously.
pub type CompletionCallback = Box<dyn FnOnce(TransportOperation) + Send + 'static>;

/// Opaque per-layer state carried on a descriptor.
pub type UserToken = Box<dyn Any + Send>;

/// The byte range(s) an operation reads into or writes from.
#[derive(Debug, Default)]
pub enum OperationBuffer {
    /// No buffer (connect, accept, negotiate)
    #[default]
    Empty,
    /// A single range `buffer[offset..offset + count]`
    Single {
        /// Backing storage
        buffer: BytesMut,
        /// Start of the range
        offset: usize,
        /// Length of the range
        count: usize,
    },
    /// An ordered list of ranges for gather writes
    List(Vec<Bytes>),
}

impl OperationBuffer {
    /// Total number of bytes described.
    pub fn len(&self) -> usize {
        match self {
            OperationBuffer::Empty => 0,
            OperationBuffer::Single { count, .. } => *count,
            OperationBuffer::List(list) => list.iter().map(Bytes::len).sum(),
        }
    }

    /// Returns `true` if no bytes are described.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Descriptor for one in-flight operation.
///
/// The owning layer may replace the transport mid-operation (an upgrade
/// hands back a different transport than it was given) and may stash its
/// own state in the two user tokens.
pub struct TransportOperation {
    /// Buffer the operation reads into or writes from
    pub buffer: OperationBuffer,
    /// Transport the operation runs against; holds the result transport
    /// after a connect, accept or negotiate
    pub transport: Option<BoxedTransport>,
    /// Bytes read or written
    pub bytes_transferred: usize,
    /// Failure, if any; `None` means success
    pub error: Option<AmqpError>,
    /// `true` if the outcome was known before the initiating call returned
    pub completed_synchronously: bool,
    /// AMQP header the peer sent, set by a successful accept
    pub protocol_header: Option<ProtocolHeader>,
    /// Opaque slot for the owning layer
    pub user_token: Option<UserToken>,
    /// Second opaque slot for the owning layer
    pub user_token2: Option<UserToken>,
    callback: Option<CompletionCallback>,
}

impl TransportOperation {
    /// Creates a descriptor that reports asynchronous completion to `callback`.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(TransportOperation) + Send + 'static,
    {
        Self {
            buffer: OperationBuffer::Empty,
            transport: None,
            bytes_transferred: 0,
            error: None,
            completed_synchronously: false,
            protocol_header: None,
            user_token: None,
            user_token2: None,
            callback: Some(Box::new(callback)),
        }
    }

    /// Sets the transport the operation runs against.
    pub fn with_transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses the whole of `buffer` as a single range.
    pub fn with_single(mut self, buffer: BytesMut) -> Self {
        let count = buffer.len();
        self.buffer = OperationBuffer::Single {
            buffer,
            offset: 0,
            count,
        };
        self
    }

    /// Uses `buffer[offset..offset + count]` as a single range.
    pub fn with_range(mut self, buffer: BytesMut, offset: usize, count: usize) -> Self {
        self.buffer = OperationBuffer::Single {
            buffer,
            offset,
            count,
        };
        self
    }

    /// Uses an ordered list of ranges.
    pub fn with_list(mut self, list: Vec<Bytes>) -> Self {
        self.buffer = OperationBuffer::List(list);
        self
    }

    /// Sets the first user token.
    pub fn with_user_token(mut self, token: UserToken) -> Self {
        self.user_token = Some(token);
        self
    }

    /// Returns `true` if the operation finished without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn apply(&mut self, completion: Completion) {
        if let Some(transport) = completion.transport {
            self.transport = Some(transport);
        }
        if let Some(buffer) = completion.buffer {
            self.buffer = buffer;
        }
        if let Some(header) = completion.protocol_header {
            self.protocol_header = Some(header);
        }
        self.bytes_transferred = completion.bytes_transferred;
        self.error = completion.error;
    }

    fn invoke_callback(mut self) {
        if let Some(callback) = self.callback.take() {
            callback(self);
        }
    }
}

impl fmt::Debug for TransportOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOperation")
            .field("buffer_len", &self.buffer.len())
            .field(
                "transport",
                &self.transport.as_ref().map(|t| t.metadata().id),
            )
            .field("bytes_transferred", &self.bytes_transferred)
            .field("error", &self.error)
            .field("completed_synchronously", &self.completed_synchronously)
            .field("protocol_header", &self.protocol_header)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Result of initiating an operation.
#[derive(Debug)]
pub enum OperationStatus {
    /// The operation finished before the call returned; the callback will
    /// not be invoked.
    Completed(TransportOperation),
    /// The callback will be invoked exactly once, later.
    Pending,
}

impl OperationStatus {
    /// Returns `true` if the callback will be invoked later.
    pub fn is_pending(&self) -> bool {
        matches!(self, OperationStatus::Pending)
    }

    /// Returns the descriptor of a synchronously completed operation.
    pub fn completed(self) -> Option<TransportOperation> {
        match self {
            OperationStatus::Completed(op) => Some(op),
            OperationStatus::Pending => None,
        }
    }
}

/// What an operation's future produces; applied to the descriptor on
/// completion.
#[derive(Default)]
pub struct Completion {
    transport: Option<BoxedTransport>,
    buffer: Option<OperationBuffer>,
    protocol_header: Option<ProtocolHeader>,
    bytes_transferred: usize,
    error: Option<AmqpError>,
}

impl Completion {
    /// A successful completion handing back `transport`.
    pub fn success(transport: BoxedTransport) -> Self {
        Self {
            transport: Some(transport),
            ..Self::default()
        }
    }

    /// A failed completion. Any transport the operation held has already
    /// been dropped.
    pub fn failure(error: AmqpError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Returns the buffer to the descriptor.
    pub fn with_buffer(mut self, buffer: OperationBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Records the number of bytes moved.
    pub fn with_bytes_transferred(mut self, bytes: usize) -> Self {
        self.bytes_transferred = bytes;
        self
    }

    /// Records the AMQP header the peer sent.
    pub fn with_protocol_header(mut self, header: ProtocolHeader) -> Self {
        self.protocol_header = Some(header);
        self
    }
}

/// One-shot "who completed me" flag.
///
/// The first caller of [`try_complete`](CompletionFlag::try_complete) wins;
/// every later caller sees `false`.
#[derive(Debug, Default)]
pub struct CompletionFlag(AtomicBool);

impl CompletionFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Sets the flag, returning `true` only for the caller that set it.
    pub fn try_complete(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` once any caller has set the flag.
    pub fn is_completed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct PendingOperation {
    flag: CompletionFlag,
    op: Mutex<Option<TransportOperation>>,
    timer: Mutex<Option<AbortHandle>>,
}

impl PendingOperation {
    fn finish(&self, completion: Completion) {
        if !self.flag.try_complete() {
            trace!("operation finished after timeout; discarding result");
            return;
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        if let Some(mut op) = self.op.lock().take() {
            op.apply(completion);
            op.invoke_callback();
        }
    }

    fn time_out(&self, duration: Duration, task: &AbortHandle) {
        if !self.flag.try_complete() {
            return;
        }
        debug!(?duration, "operation timed out; aborting");
        task.abort();
        if let Some(mut op) = self.op.lock().take() {
            op.transport = None;
            op.bytes_transferred = 0;
            op.error = Some(AmqpError::Timeout { duration });
            op.invoke_callback();
        }
    }
}

/// Runs `work` under the completion contract.
///
/// `work` is polled once on the calling thread. If it finishes, the
/// descriptor is returned in [`OperationStatus::Completed`] with
/// `completed_synchronously` set. Otherwise it is spawned on the current
/// Tokio runtime and the descriptor's callback fires exactly once, either
/// with the result of `work` or with a timeout after `timeout` elapses.
///
/// Must be called from within a Tokio runtime.
pub fn drive<F>(mut op: TransportOperation, timeout: Option<Duration>, work: F) -> OperationStatus
where
    F: Future<Output = Completion> + Send + 'static,
{
    let mut work = Box::pin(work);
    let waker = futures_util::task::noop_waker();
    let mut cx = Context::from_waker(&waker);

    if let Poll::Ready(completion) = work.as_mut().poll(&mut cx) {
        op.apply(completion);
        op.completed_synchronously = true;
        return OperationStatus::Completed(op);
    }

    op.completed_synchronously = false;
    let pending = Arc::new(PendingOperation {
        flag: CompletionFlag::new(),
        op: Mutex::new(Some(op)),
        timer: Mutex::new(None),
    });

    let task_pending = Arc::clone(&pending);
    let task = tokio::spawn(async move {
        let completion = work.await;
        task_pending.finish(completion);
    });

    if let Some(duration) = timeout {
        let task = task.abort_handle();
        let timer_pending = Arc::clone(&pending);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            timer_pending.time_out(duration, &task);
        });
        *pending.timer.lock() = Some(timer.abort_handle());
        // The task may have finished before the timer handle was stored.
        if pending.flag.is_completed() {
            timer.abort();
        }
    }

    OperationStatus::Pending
}

/// Writes the descriptor's buffer to its transport.
///
/// On completion the transport and buffer are back on the descriptor and
/// `bytes_transferred` holds the number of bytes written.
pub fn write(mut op: TransportOperation, timeout: Option<Duration>) -> OperationStatus {
    let transport = op.transport.take();
    let buffer = std::mem::take(&mut op.buffer);
    drive(op, timeout, async move {
        let Some(mut transport) = transport else {
            return Completion::failure(AmqpError::invalid_operation(
                "write operation has no transport",
            ));
        };
        let result = match &buffer {
            OperationBuffer::Empty => Ok(0),
            OperationBuffer::Single {
                buffer: bytes,
                offset,
                count,
            } => match bytes.get(*offset..offset + count) {
                Some(range) => transport.write_all(range).await.map(|()| range.len()),
                None => {
                    return Completion::failure(AmqpError::invalid_operation(
                        "write range exceeds buffer",
                    ));
                }
            },
            OperationBuffer::List(list) => {
                let mut total = 0;
                let mut result = Ok(());
                for chunk in list {
                    result = transport.write_all(chunk).await;
                    if result.is_err() {
                        break;
                    }
                    total += chunk.len();
                }
                result.map(|()| total)
            }
        };
        let result = match result {
            Ok(n) => transport.flush().await.map(|()| n),
            Err(e) => Err(e),
        };
        match result {
            Ok(n) => Completion::success(transport)
                .with_buffer(buffer)
                .with_bytes_transferred(n),
            Err(e) => {
                transport.abort();
                Completion::failure(TransportError::from_write(e).into()).with_buffer(buffer)
            }
        }
    })
}

/// Reads up to `count` bytes into the descriptor's single-range buffer.
///
/// A read of zero bytes means the peer closed the stream.
pub fn read(mut op: TransportOperation, timeout: Option<Duration>) -> OperationStatus {
    let transport = op.transport.take();
    let buffer = std::mem::take(&mut op.buffer);
    drive(op, timeout, async move {
        let Some(mut transport) = transport else {
            return Completion::failure(AmqpError::invalid_operation(
                "read operation has no transport",
            ));
        };
        let OperationBuffer::Single {
            buffer: mut bytes,
            offset,
            count,
        } = buffer
        else {
            return Completion::failure(AmqpError::invalid_operation(
                "read operation needs a single buffer range",
            ))
            .with_buffer(buffer);
        };
        if bytes.len() < offset + count {
            bytes.resize(offset + count, 0);
        }
        let result = transport.read(&mut bytes[offset..offset + count]).await;
        let buffer = OperationBuffer::Single {
            buffer: bytes,
            offset,
            count,
        };
        match result {
            Ok(n) => Completion::success(transport)
                .with_buffer(buffer)
                .with_bytes_transferred(n),
            Err(e) => {
                transport.abort();
                Completion::failure(TransportError::from_read(e).into()).with_buffer(buffer)
            }
        }
    })
}

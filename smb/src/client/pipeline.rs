//! Splits one logical read or write into wire requests and reassembles the result.
//!
//! A transfer that fits one server maximum (or runs in strict synchronous mode)
//! goes out one request at a time. Anything larger is cut into quanta of the size
//! the channel's [`QuantumTuner`](crate::client::quantum::QuantumTuner) picks, with
//! that many quanta kept in flight and each slot refilled as its reply lands.
//!
//! Two drivers share the per-quantum logic. The cooperative driver issues and
//! awaits everything on the calling task; it is used when messages are signed or
//! sealed. The worker driver runs each quantum on its own task so signing and
//! sending happen in parallel.
//!
//! Every quantum gets at most one recovery: a transport fault hands the error to
//! [`QuantumTarget::recover`] and resends the quantum, with the replay marker for
//! writes. A short reply on a regular file gets one request for the missing tail.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio::time::Instant;

use smb_core::error::SMBError;
use smb_core::logging::{debug, trace, warn};
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::client::connection::{Exchange, PendingReply};
use crate::client::quantum::QuantumPlan;
use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::read::SMBReadRequest;
use crate::protocol::body::write::SMBWriteRequest;
use crate::protocol::body::SMBBody;

/// One wire request's worth of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantumOp {
    Read { offset: u64, length: u32 },
    Write { offset: u64, data: Bytes },
}

impl QuantumOp {
    pub fn offset(&self) -> u64 {
        match self {
            Self::Read { offset, .. } | Self::Write { offset, .. } => *offset,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            Self::Read { length, .. } => *length,
            Self::Write { data, .. } => data.len() as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes change server state and carry the replay marker when resent.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Write { .. })
    }

    /// The part left after the first `done` bytes went through.
    fn tail(&self, done: u32) -> Self {
        match self {
            Self::Read { offset, length } => Self::Read {
                offset: offset + done as u64,
                length: length - done,
            },
            Self::Write { offset, data } => Self::Write {
                offset: offset + done as u64,
                data: data.slice(done as usize..),
            },
        }
    }

    pub fn to_body(&self, file_id: SMBFileId) -> SMBBody {
        match self {
            Self::Read { offset, length } => SMBBody::ReadRequest(SMBReadRequest::new(file_id, *offset, *length)),
            Self::Write { offset, data } => SMBBody::WriteRequest(SMBWriteRequest::new(file_id, *offset, data.to_vec())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    pub max_read: u32,
    pub max_write: u32,
    /// Pipes return partial reads as a matter of course.
    pub is_pipe: bool,
    /// Await replies on the calling task instead of spawning workers.
    pub cooperative: bool,
    pub strict_sync: bool,
}

/// Where quanta go: an open file on some channel.
pub trait QuantumTarget: Send + Sync + 'static {
    fn limits(&self) -> TransferLimits;

    /// Quantum size and count for a multi-quantum transfer.
    fn plan(&self, max_transfer: u32) -> QuantumPlan;

    fn record(&self, plan: &QuantumPlan, bytes: u64, elapsed: Duration);

    fn submit(&self, op: &QuantumOp, replay: bool) -> impl Future<Output = SMBResult<PendingReply>> + Send;

    /// Makes the target usable again after a transport fault, or fails for good.
    fn recover(&self, error: &SMBError) -> impl Future<Output = SMBResult<()>> + Send;
}

#[derive(Debug)]
struct QuantumDone {
    offset: u64,
    requested: u32,
    data: Vec<u8>,
    transferred: u32,
    eof: bool,
    error: Option<SMBError>,
}

impl QuantumDone {
    fn failed(op: &QuantumOp, error: SMBError) -> Self {
        Self {
            offset: op.offset(),
            requested: op.len(),
            data: Vec::new(),
            transferred: 0,
            eof: false,
            error: Some(error),
        }
    }

    fn is_short(&self) -> bool {
        self.transferred < self.requested
    }
}

async fn resend<T: QuantumTarget>(target: &T, op: &QuantumOp, error: &SMBError) -> SMBResult<Exchange> {
    warn!(offset = op.offset(), length = op.len(), error = %error, "quantum lost, resending");
    target.recover(error).await?;
    target.submit(op, op.is_mutating()).await?.wait().await
}

/// Turns one reply into bytes moved. `EndOfFile` on a read is zero bytes, not an error.
fn interpret(op: &QuantumOp, exchange: Exchange) -> SMBResult<(Vec<u8>, u32, bool)> {
    let status = exchange.status();
    match (op, exchange.response.body) {
        (QuantumOp::Read { .. }, _) if status == NTStatus::EndOfFile => Ok((Vec::new(), 0, true)),
        (_, _) if status.is_error() => Err(SMBError::status_error(status, "Quantum failed")),
        (QuantumOp::Read { length, .. }, SMBBody::ReadResponse(response)) => {
            let mut data = response.data;
            data.truncate(*length as usize);
            let count = data.len() as u32;
            Ok((data, count, false))
        }
        (QuantumOp::Write { data, .. }, SMBBody::WriteResponse(response)) => {
            Ok((Vec::new(), response.count.min(data.len() as u32), false))
        }
        _ => Err(SMBError::parse_error("Reply does not match the quantum")),
    }
}

/// Waits for a quantum, recovering once from a transport fault and asking once for a short tail.
async fn complete<T: QuantumTarget>(
    target: &T,
    op: QuantumOp,
    submitted: SMBResult<PendingReply>,
    is_pipe: bool,
) -> QuantumDone {
    let first = match submitted {
        Ok(pending) => pending.wait().await,
        Err(e) => Err(e),
    };
    let exchange = match first {
        Err(e) if e.is_transport() => resend(target, &op, &e).await,
        other => other,
    };
    let (data, transferred, eof) = match exchange.and_then(|exchange| interpret(&op, exchange)) {
        Ok(x) => x,
        Err(e) => return QuantumDone::failed(&op, e),
    };
    let mut done = QuantumDone { offset: op.offset(), requested: op.len(), data, transferred, eof, error: None };
    if is_pipe || eof || !done.is_short() {
        return done;
    }

    let tail = op.tail(done.transferred);
    trace!(offset = tail.offset(), length = tail.len(), "re-requesting short tail");
    let result = match target.submit(&tail, false).await {
        Ok(pending) => pending.wait().await.and_then(|exchange| interpret(&tail, exchange)),
        Err(e) => Err(e),
    };
    match result {
        Ok((data, transferred, eof)) => {
            done.data.extend(data);
            done.transferred += transferred;
            done.eof = eof || done.is_short();
            if op.is_mutating() && done.is_short() {
                done.error = Some(SMBError::status_error(NTStatus::DiskFull, "Write stayed short after a retry"));
            }
        }
        Err(e) => done.error = Some(e),
    }
    done
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

/// Hands out consecutive quanta of a transfer.
#[derive(Debug)]
struct Splitter {
    direction: Direction,
    origin: u64,
    next: u64,
    end: u64,
    data: Bytes,
}

impl Splitter {
    fn next(&mut self, size: u32) -> Option<QuantumOp> {
        if self.next >= self.end {
            return None;
        }
        let length = (self.end - self.next).min(size.max(1) as u64);
        let offset = self.next;
        self.next += length;
        Some(match self.direction {
            Direction::Read => QuantumOp::Read { offset, length: length as u32 },
            Direction::Write => {
                let start = (offset - self.origin) as usize;
                QuantumOp::Write { offset, data: self.data.slice(start..start + length as usize) }
            }
        })
    }
}

/// Collects finished quanta in whatever order they complete.
#[derive(Debug)]
struct Ledger {
    direction: Direction,
    origin: u64,
    done: Vec<QuantumDone>,
    error: Option<SMBError>,
    stopped: bool,
}

impl Ledger {
    fn new(direction: Direction, origin: u64) -> Self {
        Self { direction, origin, done: Vec::new(), error: None, stopped: false }
    }

    fn absorb(&mut self, mut done: QuantumDone) {
        if let Some(error) = done.error.take() {
            debug!(offset = done.offset, error = %error, "quantum failed");
            self.stopped = true;
            if self.error.is_none() {
                self.error = Some(error);
            }
        }
        if done.eof {
            self.stopped = true;
        }
        self.done.push(done);
    }

    /// Reads keep the contiguous prefix from the start offset; anything after a gap is dropped.
    fn finish_read(mut self) -> SMBResult<Vec<u8>> {
        self.done.sort_by_key(|d| d.offset);
        let mut buffer = Vec::new();
        let mut expected = self.origin;
        for done in self.done {
            if done.offset != expected {
                break;
            }
            expected += done.transferred as u64;
            let short = done.is_short();
            buffer.extend(done.data);
            if short {
                break;
            }
        }
        match self.error {
            Some(error) if buffer.is_empty() => Err(error),
            Some(error) => Err(SMBError::partial_transfer(buffer.len() as u64, error)),
            None => Ok(buffer),
        }
    }

    /// Writes count the same contiguous prefix; bytes landed past a hole are not reported.
    fn finish_write(mut self) -> SMBResult<u64> {
        self.done.sort_by_key(|d| d.offset);
        let mut expected = self.origin;
        for done in &self.done {
            if done.offset != expected {
                break;
            }
            expected += done.transferred as u64;
            if done.is_short() {
                break;
            }
        }
        let total = expected - self.origin;
        match self.error {
            Some(error) if total == 0 => Err(error),
            Some(error) => Err(SMBError::partial_transfer(total, error)),
            None => Ok(total),
        }
    }

    fn finish(self) -> SMBResult<(Vec<u8>, u64)> {
        match self.direction {
            Direction::Read => self.finish_read().map(|data| {
                let count = data.len() as u64;
                (data, count)
            }),
            Direction::Write => self.finish_write().map(|count| (Vec::new(), count)),
        }
    }
}

/// Reads up to `length` bytes at `offset`. Fewer bytes come back only at end of file.
pub async fn read<T: QuantumTarget>(target: &Arc<T>, offset: u64, length: u64) -> SMBResult<Vec<u8>> {
    let splitter = Splitter { direction: Direction::Read, origin: offset, next: offset, end: offset + length, data: Bytes::new() };
    transfer(target, splitter).await.map(|(data, _)| data)
}

/// Writes `data` at `offset` and returns the bytes the server accepted.
pub async fn write<T: QuantumTarget>(target: &Arc<T>, offset: u64, data: Bytes) -> SMBResult<u64> {
    let end = offset + data.len() as u64;
    let splitter = Splitter { direction: Direction::Write, origin: offset, next: offset, end, data };
    transfer(target, splitter).await.map(|(_, count)| count)
}

async fn transfer<T: QuantumTarget>(target: &Arc<T>, mut splitter: Splitter) -> SMBResult<(Vec<u8>, u64)> {
    let limits = target.limits();
    let max = match splitter.direction {
        Direction::Read => limits.max_read,
        Direction::Write => limits.max_write,
    }.max(1);
    let length = splitter.end - splitter.origin;
    let mut ledger = Ledger::new(splitter.direction, splitter.origin);
    if length == 0 {
        return ledger.finish();
    }

    if limits.is_pipe && splitter.direction == Direction::Read {
        // A pipe read returns one message, whatever its size.
        splitter.end = splitter.origin + length.min(max as u64);
    }
    if length <= max as u64 || limits.strict_sync || limits.is_pipe {
        debug!(length, max, "sequential transfer");
        while !ledger.stopped {
            let Some(op) = splitter.next(max) else {
                break;
            };
            let submitted = target.submit(&op, false).await;
            ledger.absorb(complete(&**target, op, submitted, limits.is_pipe).await);
        }
        return ledger.finish();
    }

    let mut plan = target.plan(max);
    if plan.count == 0 {
        // One quantum at a time, each waiting in the connection for its credits.
        plan.count = 1;
    }
    debug!(
        length,
        size = plan.size,
        count = plan.count,
        throttled = plan.throttled,
        cooperative = limits.cooperative,
        "pipelined transfer"
    );
    if limits.cooperative {
        cooperative(target, &plan, &mut splitter, &mut ledger).await;
    } else {
        workers(target, &plan, &mut splitter, &mut ledger).await;
    }
    ledger.finish()
}

async fn cooperative<T: QuantumTarget>(target: &Arc<T>, plan: &QuantumPlan, splitter: &mut Splitter, ledger: &mut Ledger) {
    let mut in_flight = VecDeque::new();
    loop {
        while in_flight.len() < plan.count as usize && !ledger.stopped {
            let Some(op) = splitter.next(plan.size) else {
                break;
            };
            let started = Instant::now();
            let submitted = target.submit(&op, false).await;
            in_flight.push_back((op, started, submitted));
        }
        let Some((op, started, submitted)) = in_flight.pop_front() else {
            break;
        };
        let done = complete(&**target, op, submitted, false).await;
        target.record(plan, done.transferred as u64, started.elapsed());
        ledger.absorb(done);
    }
}

async fn workers<T: QuantumTarget>(target: &Arc<T>, plan: &QuantumPlan, splitter: &mut Splitter, ledger: &mut Ledger) {
    let mut tasks = JoinSet::new();
    loop {
        while tasks.len() < plan.count as usize && !ledger.stopped {
            let Some(op) = splitter.next(plan.size) else {
                break;
            };
            let target = target.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let submitted = target.submit(&op, false).await;
                let done = complete(&*target, op, submitted, false).await;
                (done, started.elapsed())
            });
        }
        let Some(joined) = tasks.join_next().await else {
            break;
        };
        match joined {
            Ok((done, elapsed)) => {
                target.record(plan, done.transferred as u64, elapsed);
                ledger.absorb(done);
            }
            Err(e) => {
                warn!(error = %e, "I/O worker failed");
                ledger.stopped = true;
                ledger.error.get_or_insert(SMBError::io_error(e));
            }
        }
    }
}

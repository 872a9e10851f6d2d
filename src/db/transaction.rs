//! Multi-step atomic transactions.
//!
//! A transaction body is a [`Procedure`]: a state machine that is resumed
//! with the reply to its previous step and answers with the next
//! [`Instruction`] or its final output. The store interprets one instruction
//! at a time against a staged view of the data, so a body never observes a
//! half-applied step, and all staged writes are committed together once the
//! procedure completes. Any error, or a raised [`AbortSignal`], discards the
//! staged writes.
//!
//! ```rust
//! use cellstore::db::transaction::{Instruction, Procedure, Reply, Request, Yield};
//! use cellstore::storage::Collection;
//! use cellstore::{Result, Store, TransactionMode};
//!
//! /// Reads one POI by guid.
//! struct Lookup(Option<String>);
//!
//! impl Procedure for Lookup {
//!     type Output = bool;
//!
//!     fn resume(&mut self, reply: Option<Reply>) -> Result<Yield<'_, bool>> {
//!         match (self.0.take(), reply) {
//!             (Some(key), None) => Ok(Yield::Step(Instruction::Single(Request::Get {
//!                 collection: Collection::Pois,
//!                 key,
//!             }))),
//!             (None, Some(reply)) => Ok(Yield::Complete(reply.into_single()?.into_record()?.is_some())),
//!             _ => Err(cellstore::CellStoreError::ProcedureState("unexpected resume".into())),
//!         }
//!     }
//! }
//!
//! let store = Store::memory()?;
//! let found = store.transaction(TransactionMode::ReadOnly, Lookup(Some("guid".into())), None)?;
//! assert!(!found);
//! # Ok::<(), cellstore::CellStoreError>(())
//! ```

use crate::error::{CellStoreError, Result};
use crate::storage::{Collection, Record, StorageBackend, StorageOp};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// External cancellation signal for an in-flight transaction.
///
/// Clones share the same flag. Raising it before commit aborts the
/// transaction at its next step boundary; raising it after commit has no
/// effect.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A single store operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Read a record by primary key
    Get { collection: Collection, key: String },
    /// Read every record whose index contains `index_key`
    GetAllByIndex {
        collection: Collection,
        index_key: String,
    },
    /// Insert or replace a record
    Put(Record),
    /// Delete a record by primary key
    Delete { collection: Collection, key: String },
}

impl Request {
    pub fn is_write(&self) -> bool {
        matches!(self, Request::Put(_) | Request::Delete { .. })
    }
}

/// Result of a single [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Record(Option<Record>),
    Records(Vec<Record>),
    Written,
}

impl Response {
    pub fn into_record(self) -> Result<Option<Record>> {
        match self {
            Response::Record(record) => Ok(record),
            other => Err(unexpected("a record", &other)),
        }
    }

    pub fn into_records(self) -> Result<Vec<Record>> {
        match self {
            Response::Records(records) => Ok(records),
            other => Err(unexpected("a record list", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &impl std::fmt::Debug) -> CellStoreError {
    CellStoreError::ProcedureState(format!("expected {wanted}, got {got:?}"))
}

/// Visitor verdict for a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Break,
}

/// Per-record callback of a range scan.
pub type ScanVisitor<'a> = Box<dyn FnMut(&Record) -> ScanControl + 'a>;

/// One step of a transaction body.
pub enum Instruction<'a> {
    /// One request
    Single(Request),
    /// Requests resolved together; the next step is issued only after all of them
    Batch(Vec<Request>),
    /// Walk the records indexed under `index_key` in primary key order
    RangeScan {
        collection: Collection,
        index_key: String,
        /// Stop after this many records
        limit: Option<usize>,
        visitor: ScanVisitor<'a>,
    },
}

impl std::fmt::Debug for Instruction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Single(request) => f.debug_tuple("Single").field(request).finish(),
            Instruction::Batch(requests) => f.debug_tuple("Batch").field(&requests.len()).finish(),
            Instruction::RangeScan {
                collection,
                index_key,
                limit,
                ..
            } => f
                .debug_struct("RangeScan")
                .field("collection", collection)
                .field("index_key", index_key)
                .field("limit", limit)
                .finish_non_exhaustive(),
        }
    }
}

/// What the store hands back to a procedure after a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Single(Response),
    Batch(Vec<Response>),
    Scanned {
        /// Records handed to the visitor
        visited: usize,
        /// The visitor asked to stop or the limit was reached
        stopped: bool,
    },
}

impl Reply {
    pub fn into_single(self) -> Result<Response> {
        match self {
            Reply::Single(response) => Ok(response),
            other => Err(unexpected("a single response", &other)),
        }
    }

    pub fn into_batch(self) -> Result<Vec<Response>> {
        match self {
            Reply::Batch(responses) => Ok(responses),
            other => Err(unexpected("a batch response", &other)),
        }
    }

    pub fn into_scanned(self) -> Result<usize> {
        match self {
            Reply::Scanned { visited, .. } => Ok(visited),
            other => Err(unexpected("a scan result", &other)),
        }
    }
}

/// A procedure's answer when resumed.
#[derive(Debug)]
pub enum Yield<'a, T> {
    /// Suspend until this instruction has been executed
    Step(Instruction<'a>),
    /// The body is finished
    Complete(T),
}

/// A transaction body, driven by [`Store::transaction`](crate::Store::transaction).
///
/// The first call to `resume` receives `None`; every later call receives the
/// reply to the instruction yielded before it.
pub trait Procedure {
    type Output;

    fn resume(&mut self, reply: Option<Reply>) -> Result<Yield<'_, Self::Output>>;
}

/// A read view over a backend with a private write set layered on top.
pub(crate) struct Staged<'s> {
    backend: &'s dyn StorageBackend,
    mode: TransactionMode,
    writes: BTreeMap<(Collection, String), Option<Record>>,
}

impl<'s> Staged<'s> {
    pub(crate) fn new(backend: &'s dyn StorageBackend, mode: TransactionMode) -> Self {
        Self {
            backend,
            mode,
            writes: BTreeMap::new(),
        }
    }

    fn get(&self, collection: Collection, key: &str) -> Result<Option<Record>> {
        match self.writes.get(&(collection, key.to_string())) {
            Some(staged) => Ok(staged.clone()),
            None => self.backend.get(collection, key),
        }
    }

    fn index_lookup(&self, collection: Collection, index_key: &str) -> Result<Vec<Record>> {
        let mut keys: BTreeSet<String> = self
            .backend
            .index_lookup(collection, index_key)?
            .into_iter()
            .collect();
        for ((c, key), staged) in &self.writes {
            if *c != collection {
                continue;
            }
            match staged {
                Some(record) if record.index_keys().iter().any(|k| k == index_key) => {
                    keys.insert(key.clone());
                }
                _ => {
                    keys.remove(key);
                }
            }
        }

        let mut records = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(record) = self.get(collection, key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn request(&mut self, request: Request) -> Result<Response> {
        if request.is_write() && self.mode == TransactionMode::ReadOnly {
            return Err(CellStoreError::ReadOnlyTransaction);
        }
        match request {
            Request::Get { collection, key } => Ok(Response::Record(self.get(collection, &key)?)),
            Request::GetAllByIndex {
                collection,
                index_key,
            } => Ok(Response::Records(self.index_lookup(collection, &index_key)?)),
            Request::Put(record) => {
                let slot = (record.collection(), record.primary_key().to_string());
                self.writes.insert(slot, Some(record));
                Ok(Response::Written)
            }
            Request::Delete { collection, key } => {
                self.writes.insert((collection, key), None);
                Ok(Response::Written)
            }
        }
    }

    pub(crate) fn execute(&mut self, instruction: Instruction<'_>) -> Result<Reply> {
        match instruction {
            Instruction::Single(request) => Ok(Reply::Single(self.request(request)?)),
            Instruction::Batch(requests) => {
                let responses = requests
                    .into_iter()
                    .map(|request| self.request(request))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Reply::Batch(responses))
            }
            Instruction::RangeScan {
                collection,
                index_key,
                limit,
                mut visitor,
            } => {
                let records = self.index_lookup(collection, &index_key)?;
                let limit = limit.unwrap_or(usize::MAX);
                let mut visited = 0;
                let mut stopped = false;
                for record in &records {
                    if visited >= limit {
                        stopped = true;
                        break;
                    }
                    visited += 1;
                    if visitor(record) == ScanControl::Break {
                        stopped = true;
                        break;
                    }
                }
                Ok(Reply::Scanned { visited, stopped })
            }
        }
    }

    /// Consume the view, producing the write set in commit order.
    pub(crate) fn into_ops(self) -> Vec<StorageOp> {
        self.writes
            .into_iter()
            .map(|((collection, key), staged)| match staged {
                Some(record) => StorageOp::Put(record),
                None => StorageOp::Delete { collection, key },
            })
            .collect()
    }
}

fn check_abort(abort: Option<&AbortSignal>) -> Result<()> {
    if abort.is_some_and(AbortSignal::is_aborted) {
        return Err(CellStoreError::Aborted);
    }
    Ok(())
}

/// Run a procedure to completion, one instruction at a time.
pub(crate) fn drive<P: Procedure>(
    staged: &mut Staged<'_>,
    procedure: &mut P,
    abort: Option<&AbortSignal>,
) -> Result<P::Output> {
    let mut reply = None;
    loop {
        check_abort(abort)?;
        match procedure.resume(reply.take())? {
            Yield::Complete(output) => {
                check_abort(abort)?;
                return Ok(output);
            }
            Yield::Step(instruction) => {
                log::trace!("executing {instruction:?}");
                reply = Some(staged.execute(instruction)?);
            }
        }
    }
}

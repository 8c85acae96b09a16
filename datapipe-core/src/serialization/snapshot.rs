//! Engine-neutral pipe snapshots and the catalog used to rebuild stages

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::args::{Arg, Args, Func};
use crate::error::{Error, Result};
use crate::keyed::{KeyedPipe, KeyedStage};
use crate::stream::{StreamPipe, StreamStage};
use crate::value::Value;

/// Rebuilds a stream stage from its captured arguments
pub type StreamDecoder = Arc<dyn Fn(Args) -> Result<Box<dyn StreamStage>> + Send + Sync>;

/// Rebuilds a keyed stage from its captured arguments
pub type KeyedDecoder = Arc<dyn Fn(Args) -> Result<Box<dyn KeyedStage>> + Send + Sync>;

static STREAM_CATALOG: LazyLock<RwLock<HashMap<String, StreamDecoder>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

static KEYED_CATALOG: LazyLock<RwLock<HashMap<String, KeyedDecoder>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn catalog_insert<D>(catalog: &RwLock<HashMap<String, D>>, kind: &str, decoder: D) -> Result<()> {
    let mut entries = catalog.write().unwrap_or_else(PoisonError::into_inner);
    if entries.contains_key(kind) {
        return Err(Error::DuplicateRegistration(kind.to_owned()));
    }
    entries.insert(kind.to_owned(), decoder);
    tracing::trace!(kind, "registered stage decoder");
    Ok(())
}

fn catalog_lookup<D: Clone>(
    catalog: &RwLock<HashMap<String, D>>,
    catalog_name: &str,
    kind: &str,
) -> Result<D> {
    catalog
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(kind)
        .cloned()
        .ok_or_else(|| Error::AttributeNotFound {
            type_name: catalog_name.to_owned(),
            attribute: kind.to_owned(),
        })
}

/// Bind a stream stage kind to the function that rebuilds it
pub fn register_stream_stage<F>(kind: &str, decoder: F) -> Result<()>
where
    F: Fn(Args) -> Result<Box<dyn StreamStage>> + Send + Sync + 'static,
{
    catalog_insert(&STREAM_CATALOG, kind, Arc::new(decoder) as StreamDecoder)
}

/// Bind a keyed stage kind to the function that rebuilds it
pub fn register_keyed_stage<F>(kind: &str, decoder: F) -> Result<()>
where
    F: Fn(Args) -> Result<Box<dyn KeyedStage>> + Send + Sync + 'static,
{
    catalog_insert(&KEYED_CATALOG, kind, Arc::new(decoder) as KeyedDecoder)
}

/// What a stage reports about itself for serialization: the catalog kind
/// it was registered under and the arguments that rebuild it
#[derive(Debug, Clone)]
pub struct StageState {
    kind: String,
    args: Args,
}

impl StageState {
    /// Create a stage state
    pub fn new(kind: impl Into<String>, args: Args) -> Self {
        Self {
            kind: kind.into(),
            args,
        }
    }

    /// Catalog kind
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Rebuild arguments
    pub fn args(&self) -> &Args {
        &self.args
    }
}

/// How closures are treated while capturing a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosurePolicy {
    /// Any callable makes the pipe unserializable
    Reject,
    /// Named callables are recorded by name; anonymous ones are rejected
    ByName,
}

/// Serializable description of a pipe graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipeSnapshot {
    /// A stream pipe and the generation of its last iterator
    Stream {
        /// Catalog kind
        kind: String,
        /// Generation at capture time
        generation: u64,
        /// Rebuild arguments
        args: Vec<ArgSnapshot>,
    },
    /// A keyed pipe
    Keyed {
        /// Catalog kind
        kind: String,
        /// Rebuild arguments
        args: Vec<ArgSnapshot>,
    },
}

/// Serializable form of a single argument.
///
/// Upstream pipes carry a node id on their first occurrence; any later
/// reference to the same pipe instance within one capture is recorded as
/// [`ArgSnapshot::Shared`], so shared upstreams are rebuilt as one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgSnapshot {
    /// Plain data
    Value(Value),
    /// Named callable
    Func(String),
    /// Upstream stream pipe
    Stream {
        /// Node id
        id: u64,
        /// Description of the upstream pipe
        pipe: Box<PipeSnapshot>,
    },
    /// Upstream keyed pipe
    Keyed {
        /// Node id
        id: u64,
        /// Description of the upstream pipe
        pipe: Box<PipeSnapshot>,
    },
    /// Another reference to a pipe captured earlier under this id
    Shared(u64),
}

// process-wide, so snapshots nested by a serialize hook never reuse an id
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Tracks the pipe instances already described during one capture
struct SnapshotWriter {
    policy: ClosurePolicy,
    seen: HashMap<*const (), u64>,
}

impl SnapshotWriter {
    fn new(policy: ClosurePolicy) -> Self {
        Self {
            policy,
            seen: HashMap::new(),
        }
    }

    /// Id of an instance already described, or a fresh id for a new one
    fn visit(&mut self, addr: *const ()) -> std::result::Result<u64, u64> {
        if let Some(id) = self.seen.get(&addr) {
            return Err(*id);
        }
        let id = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);
        self.seen.insert(addr, id);
        Ok(id)
    }

    fn args(&mut self, args: &Args) -> Result<Vec<ArgSnapshot>> {
        args.iter().map(|arg| self.arg(arg)).collect()
    }

    fn arg(&mut self, arg: &Arg) -> Result<ArgSnapshot> {
        match arg {
            Arg::Value(v) => Ok(ArgSnapshot::Value(v.clone())),
            Arg::Func(f) => capture_func(f, self.policy).map(ArgSnapshot::Func),
            Arg::Stream(p) => match self.visit(p.node_addr()) {
                Ok(id) => Ok(ArgSnapshot::Stream {
                    id,
                    pipe: Box::new(self.stream(p)?),
                }),
                Err(id) => Ok(ArgSnapshot::Shared(id)),
            },
            Arg::Keyed(p) => match self.visit(p.node_addr()) {
                Ok(id) => Ok(ArgSnapshot::Keyed {
                    id,
                    pipe: Box::new(self.keyed(p)?),
                }),
                Err(id) => Ok(ArgSnapshot::Shared(id)),
            },
        }
    }

    fn stream(&mut self, pipe: &StreamPipe) -> Result<PipeSnapshot> {
        if let Some(hook) = StreamPipe::serialize_hook() {
            if let Some(snapshot) = hook(pipe)? {
                return Ok(snapshot);
            }
        }

        let state = pipe.state()?;
        Ok(PipeSnapshot::Stream {
            args: self.args(state.args())?,
            kind: state.kind,
            generation: pipe.generation(),
        })
    }

    fn keyed(&mut self, pipe: &KeyedPipe) -> Result<PipeSnapshot> {
        if let Some(hook) = KeyedPipe::serialize_hook() {
            if let Some(snapshot) = hook(pipe)? {
                return Ok(snapshot);
            }
        }

        let state = pipe.state()?;
        Ok(PipeSnapshot::Keyed {
            args: self.args(state.args())?,
            kind: state.kind,
        })
    }
}

fn capture_func(func: &Func, policy: ClosurePolicy) -> Result<String> {
    match (policy, func.name()) {
        (ClosurePolicy::ByName, Some(name)) => Ok(name.to_owned()),
        (ClosurePolicy::ByName, None) => Err(Error::Unserializable("anonymous closure".into())),
        (ClosurePolicy::Reject, _) => Err(Error::Unserializable(format!(
            "{func:?}: closures require a by-reference engine"
        ))),
    }
}

/// Pipes rebuilt so far during one restore, by node id
#[derive(Default)]
struct SnapshotReader {
    nodes: HashMap<u64, Arg>,
}

impl SnapshotReader {
    fn args(&mut self, args: Vec<ArgSnapshot>) -> Result<Args> {
        args.into_iter().map(|arg| self.arg(arg)).collect()
    }

    fn arg(&mut self, arg: ArgSnapshot) -> Result<Arg> {
        match arg {
            ArgSnapshot::Value(v) => Ok(Arg::Value(v)),
            ArgSnapshot::Func(name) => Func::lookup(&name).map(Arg::Func),
            ArgSnapshot::Stream { id, pipe } => {
                let arg = Arg::Stream(self.stream(*pipe)?);
                self.nodes.insert(id, arg.clone());
                Ok(arg)
            }
            ArgSnapshot::Keyed { id, pipe } => {
                let arg = Arg::Keyed(self.keyed(*pipe)?);
                self.nodes.insert(id, arg.clone());
                Ok(arg)
            }
            ArgSnapshot::Shared(id) => self.nodes.get(&id).cloned().ok_or_else(|| {
                Error::InvalidArgument(format!("snapshot refers to unknown node {id}"))
            }),
        }
    }

    fn stream(&mut self, snapshot: PipeSnapshot) -> Result<StreamPipe> {
        match snapshot {
            PipeSnapshot::Stream {
                kind,
                generation,
                args,
            } => {
                let decoder = catalog_lookup(&STREAM_CATALOG, "stream stage catalog", &kind)?;
                let stage = decoder(self.args(args)?)?;
                Ok(StreamPipe::restored(stage, generation))
            }
            PipeSnapshot::Keyed { kind, .. } => Err(Error::TypeMismatch(format!(
                "expected a stream snapshot, got keyed stage '{kind}'"
            ))),
        }
    }

    fn keyed(&mut self, snapshot: PipeSnapshot) -> Result<KeyedPipe> {
        match snapshot {
            PipeSnapshot::Keyed { kind, args } => {
                let decoder = catalog_lookup(&KEYED_CATALOG, "keyed stage catalog", &kind)?;
                Ok(KeyedPipe::from_boxed(decoder(self.args(args)?)?))
            }
            PipeSnapshot::Stream { kind, .. } => Err(Error::TypeMismatch(format!(
                "expected a keyed snapshot, got stream stage '{kind}'"
            ))),
        }
    }
}

/// Pipe handles that can be captured into and rebuilt from a [`PipeSnapshot`]
pub trait Capture: Sized {
    /// Describe this pipe and everything upstream of it
    fn capture(&self, policy: ClosurePolicy) -> Result<PipeSnapshot>;

    /// Reconstruct a pipe from its description
    fn rebuild(snapshot: PipeSnapshot) -> Result<Self>;

    /// Number of items, if well defined
    fn length(&self) -> Result<usize>;
}

impl Capture for StreamPipe {
    fn capture(&self, policy: ClosurePolicy) -> Result<PipeSnapshot> {
        let mut writer = SnapshotWriter::new(policy);
        // the root can only be reached again through a shared upstream
        writer.visit(self.node_addr()).ok();
        writer.stream(self)
    }

    fn rebuild(snapshot: PipeSnapshot) -> Result<Self> {
        SnapshotReader::default().stream(snapshot)
    }

    fn length(&self) -> Result<usize> {
        StreamPipe::length(self)
    }
}

impl Capture for KeyedPipe {
    fn capture(&self, policy: ClosurePolicy) -> Result<PipeSnapshot> {
        let mut writer = SnapshotWriter::new(policy);
        writer.visit(self.node_addr()).ok();
        writer.keyed(self)
    }

    fn rebuild(snapshot: PipeSnapshot) -> Result<Self> {
        SnapshotReader::default().keyed(snapshot)
    }

    fn length(&self) -> Result<usize> {
        KeyedPipe::length(self)
    }
}

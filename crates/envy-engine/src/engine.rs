//! Engine construction and the run loop.

use crate::graph::{self, TaskTracker};
use crate::progress::{default_sink, ProgressSink};
use crate::recipe::RecipeState;
use crate::resolver;
use crate::{EngineError, PkgKind, PkgResult, Result, ResultMap};
use camino::Utf8PathBuf;
use envy_cache::{Cache, ScopedEntryLock};
use envy_config::{Phase, PkgCfg};
use envy_depot::DepotIndex;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Mutable per-node execution state, guarded by the node mutex.
#[derive(Debug, Default)]
pub(crate) struct NodeState {
    pub lock: Option<ScopedEntryLock>,
    pub pkg_path: Option<Utf8PathBuf>,
    pub kind: Option<PkgKind>,
    pub result_hash: Option<String>,
    pub completed: bool,
}

pub(crate) struct Node {
    pub key: String,
    pub cfg: Arc<PkgCfg>,
    pub recipe: RecipeState,
    /// One pending counter per phase slot.
    pub pending: [AtomicUsize; 8],
    /// `(dependent node, phase)` edges fired from this node's completion.
    pub dependents: Vec<(usize, Phase)>,
    /// Nodes this one consumes, for verb environments.
    pub dep_nodes: Vec<usize>,
    pub state: Mutex<NodeState>,
}

pub(crate) struct Shared {
    pub cache: Cache,
    pub depot: Option<Arc<DepotIndex>>,
    pub platform: &'static str,
    pub arch: &'static str,
    pub nodes: Vec<Node>,
    pub pool: rayon::ThreadPool,
    pub tracker: TaskTracker,
    pub progress: Arc<dyn ProgressSink>,
    pub first_error: Mutex<Option<(String, String)>>,
}

/// Engine construction knobs.
#[derive(Default)]
pub struct EngineOptions {
    /// Worker thread count; defaults to twice the available parallelism so
    /// blocking I/O does not starve the pool.
    pub threads: Option<usize>,
    /// Progress sink; defaults to structured logging.
    pub progress: Option<Arc<dyn ProgressSink>>,
}

pub struct Engine {
    cache: Cache,
    depot: Option<Arc<DepotIndex>>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(cache: Cache, depot: Option<DepotIndex>) -> Engine {
        Engine {
            cache,
            depot: depot.map(Arc::new),
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Engine {
        self.options = options;
        self
    }

    /// Resolve and execute the full pipeline for every root configuration.
    /// Returns a map of canonical key to per-package result; the first
    /// phase failure fails the run after unrelated nodes finish.
    pub fn run(&self, roots: &[Arc<PkgCfg>]) -> Result<ResultMap> {
        let seeds = resolver::resolve(&self.cache, roots)?;
        let node_count = seeds.len();
        info!(nodes = node_count, "engine run starting");

        let threads = self.options.threads.unwrap_or_else(|| {
            2 * std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("envy-worker-{i}"))
            .build()
            .map_err(|e| EngineError::NodeFailed {
                key: String::new(),
                message: format!("failed to build worker pool: {e}"),
            })?;

        // In-edge counts: each phase has one edge from its predecessor in
        // the static chain (or from check's dynamic decision), plus one per
        // dependency completion wired at its needed_by phase.
        let mut nodes = Vec::with_capacity(node_count);
        let mut cross_edges: Vec<Vec<(usize, Phase)>> = vec![Vec::new(); node_count];
        for (idx, seed) in seeds.iter().enumerate() {
            for &(dep, phase) in &seed.strong_deps {
                cross_edges[dep].push((idx, phase));
            }
        }

        for (idx, seed) in seeds.into_iter().enumerate() {
            let mut pending = [1usize; 8];
            for &(_, phase) in &seed.strong_deps {
                pending[phase.index()] += 1;
            }

            nodes.push(Node {
                key: seed.key,
                cfg: seed.cfg,
                dep_nodes: seed.strong_deps.iter().map(|&(d, _)| d).collect(),
                recipe: seed.recipe,
                pending: pending.map(AtomicUsize::new),
                dependents: std::mem::take(&mut cross_edges[idx]),
                state: Mutex::new(NodeState::default()),
            });
        }

        let shared = Arc::new(Shared {
            cache: self.cache.clone(),
            depot: self.depot.clone(),
            platform: envy_platform::os_name(),
            arch: envy_platform::arch_name(),
            nodes,
            pool,
            tracker: TaskTracker::default(),
            progress: self.options.progress.clone().unwrap_or_else(default_sink),
            first_error: Mutex::new(None),
        });

        graph::launch(&shared);
        shared.tracker.wait_drained();
        debug!("graph drained");

        if let Some((key, message)) = shared.first_error.lock().expect("error slot").take() {
            return Err(EngineError::NodeFailed { key, message });
        }

        let mut results = ResultMap::new();
        for node in &shared.nodes {
            let state = node.state.lock().expect("node poisoned");
            if !state.completed {
                return Err(EngineError::NodeFailed {
                    key: node.key.clone(),
                    message: "node never completed (starved by a failed dependency?)".to_string(),
                });
            }
            results.insert(
                node.key.clone(),
                PkgResult {
                    kind: state.kind.unwrap_or(PkgKind::Unknown),
                    pkg_path: state.pkg_path.clone(),
                    result_hash: state.result_hash.clone(),
                    products: node.recipe.verbs.products.clone(),
                },
            );
        }

        info!(packages = results.len(), "engine run complete");
        Ok(results)
    }
}

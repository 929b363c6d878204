//! Graph resolution: node registration, cycle detection, and weak-dependency
//! fixpoint.
//!
//! Strong dependencies register nodes recursively with an ancestor chain for
//! cycle detection. Weak edges are collected and resolved by re-iteration:
//! each pass either wires an edge to an existing node or instantiates a
//! fallback (which may grow the graph); the loop ends when nothing changes.
//! A reference-only edge left unresolved once no progress is possible fails
//! the resolution.

use crate::recipe::{materialize, RecipeState};
use crate::{EngineError, Result};
use envy_cache::Cache;
use envy_config::{Phase, PkgCfg, PkgKey};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// One fully resolved node: configuration, recipe, and strong in-edges.
#[derive(Debug)]
pub struct NodeSeed {
    pub key: String,
    pub pkg_key: PkgKey,
    pub cfg: Arc<PkgCfg>,
    pub recipe: RecipeState,
    /// `(dependency node, phase of THIS node the dependency feeds)`.
    pub strong_deps: Vec<(usize, Phase)>,
}

struct WeakEdge {
    consumer: Option<usize>,
    pattern: String,
    needed_by: Phase,
    fallback: Option<Arc<PkgCfg>>,
    resolved: Option<usize>,
}

pub struct Resolver<'c> {
    cache: &'c Cache,
    nodes: Vec<NodeSeed>,
    index_by_key: HashMap<String, usize>,
    weak_edges: Vec<WeakEdge>,
}

/// Resolve root configurations into the complete node set.
pub fn resolve(cache: &Cache, roots: &[Arc<PkgCfg>]) -> Result<Vec<NodeSeed>> {
    let mut resolver = Resolver {
        cache,
        nodes: Vec::new(),
        index_by_key: HashMap::new(),
        weak_edges: Vec::new(),
    };

    for root in roots {
        if root.is_weak_reference() {
            resolver.weak_edges.push(WeakEdge {
                consumer: None,
                pattern: root.identity.clone(),
                needed_by: needed_by_of(root)?,
                fallback: root.weak.clone(),
                resolved: None,
            });
        } else {
            let mut ancestors = Vec::new();
            resolver.register(root, &mut ancestors)?;
        }
    }

    resolver.fixpoint()?;

    // Wire resolved weak edges into their consumers' strong edge lists.
    let wired: Vec<(usize, usize, Phase)> = resolver
        .weak_edges
        .iter()
        .filter_map(|e| {
            e.consumer
                .zip(e.resolved)
                .map(|(c, r)| (c, r, e.needed_by))
        })
        .collect();
    for (consumer, dep, phase) in wired {
        if consumer != dep {
            resolver.nodes[consumer].strong_deps.push((dep, phase));
        }
    }

    debug!(nodes = resolver.nodes.len(), "graph resolved");
    Ok(resolver.nodes)
}

fn needed_by_of(cfg: &PkgCfg) -> Result<Phase> {
    let phase = cfg.needed_by.unwrap_or(Phase::Install);
    match phase {
        Phase::Fetch | Phase::Stage | Phase::Build | Phase::Install | Phase::Deploy => Ok(phase),
        other => Err(EngineError::NodeFailed {
            key: cfg.format_key(),
            message: format!("needed_by may not target the {other} phase"),
        }),
    }
}

impl Resolver<'_> {
    fn register(&mut self, cfg: &Arc<PkgCfg>, ancestors: &mut Vec<String>) -> Result<usize> {
        let key = cfg.format_key();

        if ancestors.iter().any(|a| *a == cfg.identity) {
            let mut chain = ancestors.clone();
            chain.push(cfg.identity.clone());
            return Err(EngineError::Cycle {
                chain: chain.join(" -> "),
            });
        }

        if let Some(&idx) = self.index_by_key.get(&key) {
            return Ok(idx);
        }

        trace!(key = %key, "registering node");
        let recipe = materialize(self.cache, cfg)?;

        let idx = self.nodes.len();
        self.nodes.push(NodeSeed {
            key: key.clone(),
            pkg_key: PkgKey::parse(&key)?,
            cfg: Arc::clone(cfg),
            recipe,
            strong_deps: Vec::new(),
        });
        self.index_by_key.insert(key, idx);

        ancestors.push(cfg.identity.clone());

        let declared: Vec<Arc<PkgCfg>> = self.nodes[idx].recipe.deps.to_vec();
        let mut strong = Vec::new();
        for dep in declared {
            let needed_by = needed_by_of(&dep)?;
            if dep.is_weak_reference() {
                self.weak_edges.push(WeakEdge {
                    consumer: Some(idx),
                    pattern: dep.identity.clone(),
                    needed_by,
                    fallback: dep.weak.clone(),
                    resolved: None,
                });
            } else {
                let dep_idx = self.register(&dep, ancestors)?;
                strong.push((dep_idx, needed_by));
            }
        }

        // A custom fetch consumes its source dependencies during fetch.
        let source_deps = self.nodes[idx].recipe.source_dependencies.clone();
        for identity in source_deps {
            self.weak_edges.push(WeakEdge {
                consumer: Some(idx),
                pattern: identity,
                needed_by: Phase::Fetch,
                fallback: None,
                resolved: None,
            });
        }

        ancestors.pop();
        self.nodes[idx].strong_deps.extend(strong);
        Ok(idx)
    }

    /// Iterate weak matching and fallback instantiation to a fixed point.
    fn fixpoint(&mut self) -> Result<()> {
        loop {
            let mut progress = false;

            for edge_idx in 0..self.weak_edges.len() {
                if self.weak_edges[edge_idx].resolved.is_some() {
                    continue;
                }
                let pattern = self.weak_edges[edge_idx].pattern.clone();

                let matches: Vec<usize> = self
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| n.pkg_key.matches(&pattern))
                    .map(|(i, _)| i)
                    .collect();

                match matches.len() {
                    0 => {}
                    1 => {
                        trace!(pattern = %pattern, key = %self.nodes[matches[0]].key, "weak edge resolved");
                        self.weak_edges[edge_idx].resolved = Some(matches[0]);
                        progress = true;
                    }
                    _ => {
                        return Err(EngineError::Ambiguity {
                            pattern,
                            candidates: matches
                                .iter()
                                .map(|&i| self.nodes[i].key.clone())
                                .collect(),
                        });
                    }
                }
            }

            if self.weak_edges.iter().all(|e| e.resolved.is_some()) {
                return Ok(());
            }

            // Instantiate fallbacks for still-unresolved edges and wire the
            // edge straight to the new node. Each fallback may declare
            // further dependencies, so re-iterate.
            for edge_idx in 0..self.weak_edges.len() {
                let edge = &self.weak_edges[edge_idx];
                if edge.resolved.is_some() {
                    continue;
                }
                let Some(fallback) = edge.fallback.clone() else {
                    continue;
                };
                debug!(pattern = %edge.pattern, fallback = %fallback.identity, "instantiating weak fallback");
                let mut ancestors = Vec::new();
                let idx = self.register(&fallback, &mut ancestors)?;
                self.weak_edges[edge_idx].resolved = Some(idx);
                progress = true;
            }

            if !progress {
                let unresolved = self
                    .weak_edges
                    .iter()
                    .find(|e| e.resolved.is_none())
                    .expect("loop continues only while an edge is unresolved");
                return Err(EngineError::Unsatisfied(unresolved.pattern.clone()));
            }
        }
    }
}

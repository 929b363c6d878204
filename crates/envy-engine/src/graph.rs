//! Continuation-node scheduling on the shared work-stealing pool.
//!
//! Every `(node, phase)` slot carries an atomic pending counter. A signal
//! decrements it; the transition to zero spawns the phase body on the pool.
//! Phase bodies return the slots to signal next, so dynamic edges (check's
//! hit/miss decision, depot short-circuits) are just different return
//! values. A failed phase signals nothing: downstream slots starve and the
//! graph drains around them.

use crate::engine::Shared;
use crate::phases;
use envy_config::Phase;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, trace};

/// Counts in-flight phase tasks so the engine can wait for the graph to
/// drain. Signals happen before task finish, so the count never touches
/// zero while work remains reachable.
#[derive(Debug, Default)]
pub(crate) struct TaskTracker {
    count: Mutex<usize>,
    drained: Condvar,
}

impl TaskTracker {
    fn start_task(&self) {
        *self.count.lock().expect("tracker poisoned") += 1;
    }

    fn finish_task(&self) {
        let mut count = self.count.lock().expect("tracker poisoned");
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    pub(crate) fn wait_drained(&self) {
        let mut count = self.count.lock().expect("tracker poisoned");
        while *count > 0 {
            count = self.drained.wait(count).expect("tracker poisoned");
        }
    }
}

/// Seed every node's recipe_fetch slot.
pub(crate) fn launch(shared: &Arc<Shared>) {
    for idx in 0..shared.nodes.len() {
        signal(shared, idx, Phase::RecipeFetch);
    }
}

/// Complete one in-edge of a phase slot; run the phase when the last edge
/// completes.
pub(crate) fn signal(shared: &Arc<Shared>, node: usize, phase: Phase) {
    let slot = &shared.nodes[node].pending[phase.index()];
    let prior = slot.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(prior > 0, "phase signaled below zero");
    if prior == 1 {
        spawn_phase(shared, node, phase);
    }
}

fn spawn_phase(shared: &Arc<Shared>, node: usize, phase: Phase) {
    shared.tracker.start_task();
    let task_shared = Arc::clone(shared);
    shared.pool.spawn(move || {
        run_phase(&task_shared, node, phase);
        task_shared.tracker.finish_task();
    });
}

fn run_phase(shared: &Arc<Shared>, node: usize, phase: Phase) {
    let key = &shared.nodes[node].key;
    trace!(key = %key, phase = %phase, "phase start");

    match phases::run(shared, node, phase) {
        Ok(next) => {
            trace!(key = %key, phase = %phase, "phase end");
            for (n, p) in next {
                signal(shared, n, p);
            }
        }
        Err(e) => {
            debug!(key = %key, phase = %phase, "phase failed: {e}");
            let message = e.to_string();
            {
                // Failure abandons the scoped lock; its destructor cleans
                // the entry without publishing.
                let mut state = shared.nodes[node].state.lock().expect("node poisoned");
                state.lock = None;
            }
            let mut first = shared.first_error.lock().expect("error slot poisoned");
            if first.is_none() {
                *first = Some((key.clone(), message));
            }
        }
    }
}

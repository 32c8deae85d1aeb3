//! Experiment state store
//!
//! The `StateStore` holds the latest [`ExperimentState`] and the render list
//! derived from it. It has a single writer: every replacement derives a new
//! list, diffs it against the previous one and hands `(state, script)` to the
//! observers before returning.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = StateStore::new();
//! store.subscribe(|state: &ExperimentState, script: &EditScript| {
//!     println!("{:?}: {} edits", state.phase, script.len());
//! });
//!
//! let script = store.replace(state);
//! ```

use tracing::debug;

use crate::diff::{diff, EditScript};
use crate::error::SyncError;
use crate::models::{ContentItem, Decision, ExperimentState, SessionId};
use crate::render::derive_render_list;
use crate::sync::message::Envelope;
use crate::sync::EnvelopeSink;

/// Receives every published `(state, script)` pair
pub trait StateObserver: Send {
    fn on_state(&mut self, state: &ExperimentState, script: &EditScript);
}

impl<F> StateObserver for F
where
    F: FnMut(&ExperimentState, &EditScript) + Send,
{
    fn on_state(&mut self, state: &ExperimentState, script: &EditScript) {
        self(state, script)
    }
}

/// Handle returned by [`StateStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Latest experiment state plus its render list
#[derive(Default)]
pub struct StateStore {
    state: Option<ExperimentState>,
    render_list: Vec<ContentItem>,
    /// Kept in registration order
    observers: Vec<(SubscriptionId, Box<dyn StateObserver>)>,
    next_subscription: u64,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, `None` until the first replacement
    pub fn state(&self) -> Option<&ExperimentState> {
        self.state.as_ref()
    }

    /// Render list derived from the current state
    pub fn render_list(&self) -> &[ContentItem] {
        &self.render_list
    }

    /// Replace the state and publish the resulting edit script
    ///
    /// Observers run synchronously, in registration order, before this
    /// returns. The script is also returned to the caller.
    pub fn replace(&mut self, state: ExperimentState) -> EditScript {
        let render_list = derive_render_list(&state);
        let script = diff(&self.render_list, &render_list);

        debug!(
            "State replaced ({:?}): {} items, {} edits",
            state.phase,
            render_list.len(),
            script.len()
        );

        self.render_list = render_list;
        let state = self.state.insert(state);

        for (_, observer) in self.observers.iter_mut() {
            observer.on_state(state, &script);
        }

        script
    }

    /// Validate a choice and send it as a decision
    ///
    /// Never mutates local state; the server answers with a new state push.
    pub fn submit_decision(
        &self,
        choice: &str,
        session_id: &SessionId,
        sink: &mut dyn EnvelopeSink,
    ) -> Result<(), SyncError> {
        let offered = self
            .state
            .as_ref()
            .is_some_and(|state| state.options.contains(choice));
        if !offered {
            return Err(SyncError::InvalidChoice {
                choice: choice.to_string(),
            });
        }

        let decision = Decision::new(session_id.clone(), choice)?;
        sink.send_envelope(Envelope::submit_decision(&decision)?)
    }

    /// Register an observer; it sees only future publications
    pub fn subscribe(&mut self, observer: impl StateObserver + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove an observer; returns false if it was not registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

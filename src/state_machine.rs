//! Per-session state machine.
//!
//! Transitions are edge-triggered and evaluated once per tick from a
//! snapshot the dispatcher builds. `AllResponsesReceived` is re-entrant: a
//! changed environment or a re-marked requirement restarts the cycle.

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    CompilingEnvironment,
    SendingQueries,
    AllQueriesSent,
    AllResponsesReceived,
}

impl SessionState {
    const fn name(self) -> &'static str {
        match self {
            Self::CompilingEnvironment => "CompilingEnvironment",
            Self::SendingQueries => "SendingQueries",
            Self::AllQueriesSent => "AllQueriesSent",
            Self::AllResponsesReceived => "AllResponsesReceived",
        }
    }
}

/// Tick snapshot the transitions are evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateInfo {
    pub environment_changed: bool,
    pub environment_complete: bool,
    pub queries_changed: bool,
    pub all_queries_sent: bool,
    pub all_responses_received: bool,
}

#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub const fn new() -> Self {
        Self {
            state: SessionState::CompilingEnvironment,
        }
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub fn on_update(&mut self, info: StateInfo) {
        let old = self.state;

        self.state = match self.state {
            SessionState::CompilingEnvironment if info.environment_complete => {
                SessionState::SendingQueries
            }
            SessionState::SendingQueries if info.all_queries_sent => SessionState::AllQueriesSent,
            SessionState::AllQueriesSent if info.all_responses_received => {
                SessionState::AllResponsesReceived
            }
            SessionState::AllResponsesReceived if info.environment_changed => {
                SessionState::CompilingEnvironment
            }
            SessionState::AllResponsesReceived if info.queries_changed => {
                SessionState::SendingQueries
            }
            state => state,
        };

        if old != self.state {
            tracing::info!(from = old.name(), to = self.state.name(), "state changed");
        }
    }
}

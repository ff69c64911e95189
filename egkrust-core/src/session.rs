//! Card session state machine
//!
//! A card read walks a fixed sequence of ten steps. The sequence, and which
//! steps may fail without ending the read, live in [`PROTOCOL`];
//! [`transition`] derives the successor of a state from the outcome of its
//! step. [`SessionHandle`] tracks a running read and can be shared with
//! observers that want to watch progress or cancel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    ResetCt,
    RequestIcc,
    SelectRoot,
    ReadEfAtr,
    ReadEfVersion,
    ReadEfStatusVd,
    SelectHca,
    ReadPd,
    ReadVd,
    EjectIcc,
    Done,
    Aborted,
}

impl SessionState {
    /// Check if the session has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Check if a read is in progress
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != Self::Idle
    }

    /// Get the protocol step executed in this state
    pub fn step(self) -> Option<&'static Step> {
        PROTOCOL.iter().find(|step| step.state == self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::ResetCt => "ResetCT",
            Self::RequestIcc => "RequestICC",
            Self::SelectRoot => "SelectRoot",
            Self::ReadEfAtr => "ReadEfAtr",
            Self::ReadEfVersion => "ReadEfVersion",
            Self::ReadEfStatusVd => "ReadEfStatusVd",
            Self::SelectHca => "SelectHca",
            Self::ReadPd => "ReadPD",
            Self::ReadVd => "ReadVD",
            Self::EjectIcc => "EjectICC",
            Self::Done => "Done",
            Self::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a failing step affects the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Later steps depend on it; failure aborts the session
    Structural,

    /// Failure leaves fields absent and the session continues
    Optional,
}

/// One step of the read sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// 1-based position in the sequence
    pub number: u8,
    pub state: SessionState,
    pub policy: StepPolicy,
    pub description: &'static str,
}

impl Step {
    const fn new(
        number: u8,
        state: SessionState,
        policy: StepPolicy,
        description: &'static str,
    ) -> Self {
        Self {
            number,
            state,
            policy,
            description,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.policy == StepPolicy::Structural
    }
}

/// The read sequence, in execution order
pub const PROTOCOL: [Step; 10] = [
    Step::new(1, SessionState::ResetCt, StepPolicy::Structural, "reset card terminal"),
    Step::new(2, SessionState::RequestIcc, StepPolicy::Structural, "request card and read ATR"),
    Step::new(3, SessionState::SelectRoot, StepPolicy::Structural, "select eGK root application"),
    Step::new(4, SessionState::ReadEfAtr, StepPolicy::Optional, "read EF.ATR buffer sizes"),
    Step::new(5, SessionState::ReadEfVersion, StepPolicy::Optional, "read EF.Version card generation"),
    Step::new(6, SessionState::ReadEfStatusVd, StepPolicy::Optional, "read EF.StatusVD schema version"),
    Step::new(7, SessionState::SelectHca, StepPolicy::Structural, "select health care application"),
    Step::new(8, SessionState::ReadPd, StepPolicy::Optional, "read patient data"),
    Step::new(9, SessionState::ReadVd, StepPolicy::Optional, "read insurance data"),
    Step::new(10, SessionState::EjectIcc, StepPolicy::Optional, "eject card"),
];

/// Outcome of executing the step of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,

    /// Failure whose severity follows the step policy
    Failed,

    /// Failure that ends the session regardless of policy
    Fatal,

    /// Caller asked to stop
    Cancelled,
}

/// Compute the state following `state` for `outcome`
///
/// # Errors
///
/// Returns an error if `state` is terminal.
pub fn transition(state: SessionState, outcome: StepOutcome) -> Result<SessionState> {
    if state.is_terminal() {
        return Err(Error::InvalidSessionState(format!(
            "No transition out of terminal state {}",
            state
        )));
    }

    if state == SessionState::Idle {
        return Ok(match outcome {
            StepOutcome::Cancelled => SessionState::Aborted,
            _ => SessionState::ResetCt,
        });
    }

    let index = PROTOCOL
        .iter()
        .position(|step| step.state == state)
        .ok_or_else(|| Error::InvalidSessionState(format!("No step for state {}", state)))?;
    let next = PROTOCOL
        .get(index + 1)
        .map_or(SessionState::Done, |step| step.state);

    Ok(match (outcome, PROTOCOL[index].policy) {
        (StepOutcome::Success, _) => next,
        (StepOutcome::Failed, StepPolicy::Optional) => next,
        (StepOutcome::Failed, StepPolicy::Structural) => SessionState::Aborted,
        (StepOutcome::Fatal, _) | (StepOutcome::Cancelled, _) => SessionState::Aborted,
    })
}

/// Shared view of a card session
///
/// Cloning is cheap (Arc internally); all clones observe the same state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    state: parking_lot::RwLock<SessionState>,

    /// States entered by the current read, in order
    history: parking_lot::Mutex<Vec<SessionState>>,

    cancel_requested: AtomicBool,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                state: parking_lot::RwLock::new(SessionState::Idle),
                history: parking_lot::Mutex::new(vec![SessionState::Idle]),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Check if a read is in progress
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Get the states entered by the current or last read
    pub fn history(&self) -> Vec<SessionState> {
        self.inner.history.lock().clone()
    }

    /// Prepare for a new read
    ///
    /// Clears the history and any earlier cancellation request.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.inner.state.write();

        if state.is_active() {
            return Err(Error::SessionBusy);
        }

        *state = SessionState::Idle;
        *self.inner.history.lock() = vec![SessionState::Idle];
        self.inner.cancel_requested.store(false, Ordering::Release);

        Ok(())
    }

    /// Move to `next`
    ///
    /// States are only ever entered once per read and in protocol order;
    /// `Aborted` may follow any non-terminal state.
    pub fn advance(&self, next: SessionState) -> Result<()> {
        let mut state = self.inner.state.write();
        let from = *state;

        if from.is_terminal() || next <= from {
            return Err(Error::InvalidTransition { from, to: next });
        }

        *state = next;
        self.inner.history.lock().push(next);
        Ok(())
    }

    /// Mark a read that stopped without reaching a terminal state as aborted
    ///
    /// Returns `true` if a read was in progress.
    pub fn abandon(&self) -> bool {
        let mut state = self.inner.state.write();
        if !state.is_active() {
            return false;
        }

        *state = SessionState::Aborted;
        self.inner.history.lock().push(SessionState::Aborted);
        true
    }

    /// Request cancellation; honoured after the step in flight completes
    pub fn cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

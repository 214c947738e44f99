//! Session observers.

use wc_core::MethodCall;

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    Disconnected,
    Approved,
    Closed,
    Error(SessionError),
}

/// Observer of a session.
///
/// Invoked synchronously on whichever thread detected the event. A panic
/// inside an observer is caught and logged.
pub trait SessionCallback: Send + Sync {
    fn on_status(&self, _status: &SessionStatus) {}

    fn on_method_call(&self, _call: &MethodCall) {}
}

/// Handle returned by `Session::add_callback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub(crate) u64);

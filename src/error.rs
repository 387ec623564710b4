use crate::{
    runtime::{with_current_runtime, with_runtime, Runtime, RuntimeId},
    scheduler::InstanceId,
};
use std::{any::Any, fmt, rc::Rc};
use thiserror::Error;

/// Where a captured error escaped from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// A job with no owning instance.
    #[error("scheduler job")]
    Scheduler,
    /// A job owned by a component instance.
    #[error("component update")]
    ComponentUpdate,
    #[error("watch getter")]
    WatchGetter,
    #[error("watch callback")]
    WatchCallback,
    #[error("watch cleanup")]
    WatchCleanup,
    /// A job ran more often in one flush than the recursion budget allows.
    #[error("recursion limit")]
    RecursionLimit,
}

/// An error captured from user code by the engine.
///
/// Captured errors are forwarded to the handler installed with
/// [`set_error_handler`]; they never abort a flush.
#[derive(Clone, Debug)]
pub struct ReactiveError {
    pub kind: ErrorKind,
    pub instance: Option<InstanceId>,
    pub detail: String,
}

impl fmt::Display for ReactiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance {
            Some(instance) => write!(
                f,
                "unhandled error in {} (instance {}): {}",
                self.kind, instance.0, self.detail
            ),
            None => write!(f, "unhandled error in {}: {}", self.kind, self.detail),
        }
    }
}

impl std::error::Error for ReactiveError {}

/// Installs the handler invoked for every error the current runtime
/// captures. Without one, errors are logged.
pub fn set_error_handler(handler: impl Fn(&ReactiveError) + 'static) {
    _ = with_current_runtime(|runtime| {
        *runtime.error_handler.borrow_mut() = Some(Rc::new(handler));
    });
}

impl Runtime {
    pub(crate) fn handle_error(&self, error: ReactiveError) {
        let handler = self.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(&error),
            None => tracing::error!("{error}"),
        }
    }
}

pub(crate) fn report_error(
    runtime: RuntimeId,
    kind: ErrorKind,
    instance: Option<InstanceId>,
    detail: String,
) {
    _ = with_runtime(runtime, |rt| {
        rt.handle_error(ReactiveError {
            kind,
            instance,
            detail,
        })
    });
}

pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

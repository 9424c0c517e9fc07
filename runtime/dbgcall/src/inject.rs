//! Injection orchestrator
//!
//! Runs on the debugger's thread. Validates the request, arms the
//! dispatcher, signals the target thread and sleeps until the trap handler
//! reports back. Transient scheduling states are retried with a short
//! backoff, up to the configured number of attempts.

use std::thread;

use log::{debug, trace, warn};

use crate::arch::Arch;
use crate::config::{InjectorConfig, RetryPolicy};
use crate::dispatch::{ArmGuard, Dispatcher};
use crate::error::{InjectError, Result};
use crate::handler::{CallHandler, CallOutcome};
use crate::marshal::RegArgs;
use crate::unit::{ExecutionUnit, ThreadSignaler};
use crate::value::{FramePtr, FuncVal, Value};

/// One call to inject
#[derive(Debug)]
pub struct CallRequest<'a, U, S> {
    /// Unit to run the call on; must be locked to its thread
    pub unit: &'a U,

    /// Function to call
    pub func: Value<'a>,

    /// Register-passed arguments; results come back in
    /// [`CallOutcome::reg_results`]
    pub reg_args: Option<RegArgs>,

    /// Stack argument frame: a pointer or nil
    pub stack_args: Value<'a>,

    /// Surface "not at a safe point" instead of retrying through it
    pub return_on_unsafe_point: bool,

    /// Delivers the trap signal
    pub signaler: S,
}

impl<'a, U, S> CallRequest<'a, U, S> {
    pub fn new(unit: &'a U, func: impl Into<Value<'a>>, signaler: S) -> Self {
        Self {
            unit,
            func: func.into(),
            reg_args: None,
            stack_args: Value::Nil,
            return_on_unsafe_point: false,
            signaler,
        }
    }

    pub fn reg_args(mut self, args: RegArgs) -> Self {
        self.reg_args = Some(args);
        self
    }

    pub fn stack_args(mut self, args: impl Into<Value<'a>>) -> Self {
        self.stack_args = args.into();
        self
    }

    pub fn return_on_unsafe_point(mut self, value: bool) -> Self {
        self.return_on_unsafe_point = value;
        self
    }
}

/// Injects calls through one dispatcher
pub struct Injector<'d, A: Arch, U> {
    dispatcher: &'d Dispatcher<A, U>,
    retry: RetryPolicy,
}

impl<'d, A: Arch, U: ExecutionUnit> Injector<'d, A, U> {
    pub fn new(dispatcher: &'d Dispatcher<A, U>) -> Self {
        Self::with_config(dispatcher, InjectorConfig::default())
    }

    pub fn with_config(dispatcher: &'d Dispatcher<A, U>, config: InjectorConfig) -> Self {
        Self {
            dispatcher,
            retry: config.retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `request.func` on the request's execution unit
    ///
    /// Blocks until the call finished and the unit's context was restored,
    /// or until an error. A panic inside the called function is not an
    /// error: it is returned in [`CallOutcome::panic`].
    pub fn inject_call<S: ThreadSignaler>(
        &self,
        request: CallRequest<'_, U, S>,
    ) -> Result<CallOutcome> {
        let CallRequest {
            unit,
            func,
            reg_args,
            stack_args,
            return_on_unsafe_point,
            signaler,
        } = request;

        if !unit.is_locked() {
            return Err(InjectError::NotLocked);
        }
        let tid = unit.locked_thread().ok_or(InjectError::MissingThreadId)?;
        let func = match func {
            Value::Func(func) => func,
            other => return Err(InjectError::NotAFunction { kind: other.kind() }),
        };
        let frame = stack_frame(stack_args)?;

        let handler = CallHandler::<A, U>::new(unit, tid, func, reg_args, frame);
        self.dispatcher.arm(&handler)?;
        let _armed = ArmGuard::new(self.dispatcher, &handler);

        debug!(
            "injecting call to {:#x} on thread {} ({} byte frame)",
            func.entry,
            tid,
            handler.frame_size()
        );
        self.run_attempts(&handler, &signaler, return_on_unsafe_point, func)
    }

    fn run_attempts<S: ThreadSignaler>(
        &self,
        handler: &CallHandler<'_, A, U>,
        signaler: &S,
        return_on_unsafe_point: bool,
        func: FuncVal,
    ) -> Result<CallOutcome> {
        let tid = handler.tid();
        let mut attempt = 1;
        loop {
            handler.reset();
            self.dispatcher.arm(handler)?;
            trace!("attempt {attempt}: signalling thread {tid}");
            signaler
                .signal(tid)
                .map_err(|source| InjectError::Signal { tid, source })?;
            handler.wait();
            self.dispatcher.pause();

            let err = match handler.outcome() {
                Ok(outcome) => {
                    debug!(
                        "call to {:#x} finished after {attempt} attempt(s){}",
                        func.entry,
                        if outcome.panic.is_some() { " with panic" } else { "" }
                    );
                    return Ok(outcome);
                }
                Err(fault) => InjectError::from_fault(fault, return_on_unsafe_point),
            };

            if !err.is_transient() || attempt >= self.retry.max_attempts {
                warn!("call to {:#x} failed after {attempt} attempt(s): {err}", func.entry);
                return Err(err);
            }
            warn!("attempt {attempt} on thread {tid}: {err}, retrying");
            if self.retry.backoff_us > 0 {
                thread::sleep(self.retry.backoff());
            }
            thread::yield_now();
            attempt += 1;
        }
    }
}

fn stack_frame(args: Value<'_>) -> Result<Option<FramePtr<'_>>> {
    match args {
        Value::Nil => Ok(None),
        Value::Pointer(frame) => Ok(Some(frame)),
        other => Err(InjectError::InvalidStackArgs { kind: other.kind() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Aarch64;
    use crate::dispatch::TrampolineRange;
    use crate::unit::{ThreadId, UnitStatus};
    use std::cell::Cell;
    use std::io;

    const TRAMPOLINE: TrampolineRange = TrampolineRange::new(0x1000, 0x1000, 0x1100);

    struct Unit {
        locked: bool,
        tid: Option<ThreadId>,
    }

    impl ExecutionUnit for Unit {
        fn is_locked(&self) -> bool {
            self.locked
        }

        fn locked_thread(&self) -> Option<ThreadId> {
            self.tid
        }

        fn status(&self) -> UnitStatus {
            UnitStatus::Running
        }
    }

    const LOCKED: Unit = Unit {
        locked: true,
        tid: Some(ThreadId(3)),
    };

    fn func() -> FuncVal {
        FuncVal {
            entry: 0x4000,
            closure: 0x4100,
        }
    }

    fn check_validation(unit: &Unit, func: Value<'_>, stack_args: Value<'_>) -> InjectError {
        let dispatcher = Dispatcher::<Aarch64, Unit>::new(TRAMPOLINE);
        let sent = Cell::new(0);
        let signaler = |_tid: ThreadId| -> io::Result<()> {
            sent.set(sent.get() + 1);
            Ok(())
        };
        let request = CallRequest::new(unit, func, signaler).stack_args(stack_args);
        let err = Injector::new(&dispatcher).inject_call(request).unwrap_err();
        assert_eq!(sent.get(), 0);
        assert!(!dispatcher.is_armed());
        err
    }

    #[test]
    fn unlocked_unit_rejected() {
        let unit = Unit {
            locked: false,
            tid: Some(ThreadId(3)),
        };
        let err = check_validation(&unit, func().into(), Value::Nil);
        assert!(matches!(err, InjectError::NotLocked));
        assert_eq!(err.to_string(), "execution unit not locked to thread");
    }

    #[test]
    fn missing_tid_rejected() {
        let unit = Unit {
            locked: true,
            tid: None,
        };
        let err = check_validation(&unit, func().into(), Value::Nil);
        assert!(matches!(err, InjectError::MissingThreadId));
    }

    #[test]
    fn non_function_rejected() {
        let err = check_validation(&LOCKED, Value::Scalar(1), Value::Nil);
        assert_eq!(err.to_string(), "fn must be a function (got scalar)");
    }

    #[test]
    fn non_pointer_args_rejected() {
        let err = check_validation(&LOCKED, func().into(), Value::Scalar(1));
        assert_eq!(err.to_string(), "args must be a pointer or nil (got scalar)");
    }

    #[test]
    fn signal_failure_after_one_attempt() {
        let dispatcher = Dispatcher::<Aarch64, Unit>::new(TRAMPOLINE);
        let sent = Cell::new(0);
        let signaler = |_tid: ThreadId| -> io::Result<()> {
            sent.set(sent.get() + 1);
            Err(io::Error::new(io::ErrorKind::NotFound, "no such thread"))
        };
        let err = Injector::new(&dispatcher)
            .inject_call(CallRequest::new(&LOCKED, func(), signaler))
            .unwrap_err();
        assert_eq!(sent.get(), 1);
        assert!(matches!(err, InjectError::Signal { tid: ThreadId(3), .. }));
        assert!(!dispatcher.is_armed());
    }

    #[test]
    fn default_retry_policy() {
        let dispatcher = Dispatcher::<Aarch64, Unit>::new(TRAMPOLINE);
        let policy = Injector::new(&dispatcher).retry_policy();
        assert_eq!(policy, RetryPolicy::default());
    }
}

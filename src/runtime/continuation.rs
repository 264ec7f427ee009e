//! Continuation stack frames.

use crate::effect::instruction::{FailureFn, LoopBodyFn, LoopCheckFn, LoopStepFn, SuccessFn};
use crate::types::RuntimeFlagsPatch;

/// What to do with the next success value or failure cause.
pub(crate) enum Continuation {
    OnSuccess(SuccessFn),
    OnFailure(FailureFn),
    OnSuccessAndFailure {
        on_failure: FailureFn,
        on_success: SuccessFn,
    },
    WhileLoop {
        check: LoopCheckFn,
        body: LoopBodyFn,
        step: LoopStepFn,
    },
    /// Undo a scoped flag change when the scope exits.
    RevertFlags(RuntimeFlagsPatch),
}

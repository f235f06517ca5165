//! In-process sequential execution

use super::{run_sequence, BlockCallback, BlockPlan, Executor};
use crate::config::ErrorPolicy;
use crate::error::Result;

/// Runs every block on the calling thread in row-major order
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialExecutor;

impl Executor for SerialExecutor {
    fn describe(&self) -> String {
        "serial executor".to_string()
    }

    fn execute(&self, plan: &BlockPlan, callback: &BlockCallback<'_>, policy: ErrorPolicy) -> Result<usize> {
        plan.prepare()?;
        run_sequence(plan, plan.layout().iter(), callback, policy)
    }
}

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use grove_core::skill::{Skill, SkillInput, SkillResult};

/// Bounded pool for synchronous skills.
///
/// Each sync invocation holds one permit for the duration of its blocking
/// task; callers beyond the bound wait for a permit. Async skills are awaited
/// in place and do not take a permit.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free permits right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a skill to completion. Panics and join failures become
    /// `SkillResult::Failure`.
    pub async fn invoke(&self, skill: &Skill, input: SkillInput) -> SkillResult {
        match skill {
            Skill::Async(f) => {
                let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| f(input))) {
                    Ok(fut) => fut,
                    Err(payload) => return panicked(payload),
                };
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => panicked(payload),
                }
            }
            Skill::Sync(f) => {
                let permit = match self.permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return SkillResult::failure(format!("worker pool closed: {}", e)),
                };
                debug!(available = self.available(), "Sync skill acquired worker");
                let f = Arc::clone(f);
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f(input)
                })
                .await;
                match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => panicked(e.into_panic()),
                    Err(e) => SkillResult::failure(format!("skill task failed: {}", e)),
                }
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> SkillResult {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    error!(panic = %message, "Skill panicked");
    SkillResult::failure(format!("skill panicked: {}", message))
}

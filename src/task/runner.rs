use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::FutureExt;
use strum_macros::{Display, IntoStaticStr};
use tracing::{debug, error, trace};

use crate::common::error::EscrowError;

/// One discrete unit of protocol work over a shared model. Returning `Ok`
/// hands control to the next task, returning `Err` halts the pipeline.
#[async_trait]
pub trait Task<M: Send>: Send {
    fn name(&self) -> &'static str;

    async fn run(&mut self, model: &mut M) -> Result<(), EscrowError>;
}

/// Builds a fresh task instance. Task instances are never reused across runs.
pub type TaskFactory<M> = fn() -> Box<dyn Task<M>>;

fn new_task<M: Send + 'static, T: Task<M> + Default + 'static>() -> Box<dyn Task<M>> {
    Box::new(T::default())
}

pub struct TaskSequence<M: Send> {
    factories: Vec<TaskFactory<M>>,
}

impl<M: Send + 'static> TaskSequence<M> {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    pub fn then<T: Task<M> + Default + 'static>(mut self) -> Self {
        self.factories.push(new_task::<M, T>);
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.factories
            .iter()
            .map(|factory| factory().name())
            .collect()
    }
}

impl<M: Send + 'static> Default for TaskSequence<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub type ResultHandler<M> = Box<dyn FnOnce(&mut M) + Send>;
pub type ErrorMessageHandler<M> = Box<dyn FnOnce(&mut M, String, EscrowError) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, IntoStaticStr)]
pub enum RunnerStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intercept {
    Proceed,
    Delay(Duration),
    Fail(String),
}

/// Observes every task right before it runs and may delay it or fail it in
/// place, without the task itself knowing.
pub trait InterceptHook<M>: Send + Sync {
    fn before_task(&self, task_name: &'static str, model: &M) -> Intercept;
}

pub struct TaskRunner<M: Send + 'static> {
    tasks: Vec<TaskFactory<M>>,
    cursor: usize,
    status: RunnerStatus,
    result_handler: Option<ResultHandler<M>>,
    error_handler: Option<ErrorMessageHandler<M>>,
    intercept_hook: Option<Arc<dyn InterceptHook<M>>>,
}

impl<M: Send + 'static> TaskRunner<M> {
    pub fn new(
        sequence: TaskSequence<M>,
        result_handler: impl FnOnce(&mut M) + Send + 'static,
        error_handler: impl FnOnce(&mut M, String, EscrowError) + Send + 'static,
    ) -> Result<Self, EscrowError> {
        if sequence.is_empty() {
            return Err(EscrowError::Config(
                "Task runner requires at least one task".to_string(),
            ));
        }

        Ok(Self {
            tasks: sequence.factories,
            cursor: 0,
            status: RunnerStatus::Pending,
            result_handler: Some(Box::new(result_handler)),
            error_handler: Some(Box::new(error_handler)),
            intercept_hook: None,
        })
    }

    pub fn with_intercept_hook(mut self, intercept_hook: Arc<dyn InterceptHook<M>>) -> Self {
        self.intercept_hook = Some(intercept_hook);
        self
    }

    pub fn status(&self) -> RunnerStatus {
        self.status
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Runs every task in order. Exactly one of the two handlers is invoked,
    /// exactly once. A runner only runs once.
    pub async fn run(&mut self, model: &mut M) -> Result<RunnerStatus, EscrowError> {
        if self.status != RunnerStatus::Pending {
            return Err(EscrowError::RunnerReused(self.status.to_string()));
        }
        self.status = RunnerStatus::Running;

        let intercept_hook = self.intercept_hook.clone();
        let task_count = self.tasks.len();

        while self.cursor < task_count {
            let mut task = (self.tasks[self.cursor])();
            let task_name = task.name();
            debug!("Run task {} ({}/{})", task_name, self.cursor + 1, task_count);

            let result = Self::run_task(intercept_hook.as_deref(), task.as_mut(), model).await;

            if let Err(error) = result {
                let message = format!(
                    "An error occurred at task {} ({}/{}): {}",
                    task_name,
                    self.cursor + 1,
                    task_count,
                    error
                );
                error!("{}", message);

                self.status = RunnerStatus::Failed;
                if let Some(error_handler) = self.error_handler.take() {
                    error_handler(model, message, error);
                }
                return Ok(self.status);
            }
            self.cursor += 1;
        }

        self.status = RunnerStatus::Completed;
        if let Some(result_handler) = self.result_handler.take() {
            result_handler(model);
        }
        Ok(self.status)
    }

    async fn run_task(
        intercept_hook: Option<&dyn InterceptHook<M>>,
        task: &mut dyn Task<M>,
        model: &mut M,
    ) -> Result<(), EscrowError> {
        let task_name = task.name();

        if let Some(intercept_hook) = intercept_hook {
            match intercept_hook.before_task(task_name, model) {
                Intercept::Proceed => {}
                Intercept::Delay(delay) => {
                    trace!("Delaying task {} by {:?}", task_name, delay);
                    tokio::time::sleep(delay).await;
                }
                Intercept::Fail(message) => {
                    return Err(EscrowError::TaskFailed {
                        task: task_name,
                        message,
                    });
                }
            }
        }

        let run = async { task.run(model).await };
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(EscrowError::TaskPanicked {
                task: task_name,
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

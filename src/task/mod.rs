mod runner;

pub use runner::{
    ErrorMessageHandler, Intercept, InterceptHook, ResultHandler, RunnerStatus, Task,
    TaskFactory, TaskRunner, TaskSequence,
};

mod queue;
mod worker;

pub use queue::{
    backoff_delay, FailureOutcome, QueueItem, QueueSnapshot, Ready, RetryPolicy, TaskState,
    UploadQueue, UploadTask,
};
pub use worker::UploadWorker;

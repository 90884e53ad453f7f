pub mod background_processor;
pub mod mpsc_job_queue;
pub mod progress_broadcaster;

pub use background_processor::{BackgroundProcessor, WorkerSettings};
pub use mpsc_job_queue::{MpscJobQueue, MpscJobQueueReceiver};
pub use progress_broadcaster::ProgressBroadcaster;

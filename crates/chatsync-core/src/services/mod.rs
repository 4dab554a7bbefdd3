pub mod attachment_validation;
pub mod materializer;
pub mod response_source;
pub mod upload_pipeline;

pub use materializer::{LocalFileMaterializer, Materialized, Materializer, SimulatedMaterializer};
pub use response_source::{ResponseEvent, ResponseSource, ResponseStream, SimulatedResponseSource};
pub use upload_pipeline::{AttachmentPipeline, EnqueueReport, LocalFile, UploadOutcome};

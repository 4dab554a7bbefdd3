pub mod engine;
pub mod submission_gate;

pub use engine::{ChatEngine, SendOutcome};
pub use submission_gate::{Composer, SendRequest, SubmitRejection, try_submit};

//! Model profiling: an HR-style interview that turns a battery of test
//! cases into capability scores and runtime guardrails.

pub mod battery;
pub mod interviewer;
pub mod registry;

pub use battery::{InterviewTest, TestCategory, TestOutcome, Validation};
pub use interviewer::Interviewer;
pub use registry::ModelRegistry;

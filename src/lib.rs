//! pipelab: compile stream pipelines from config text, push batches through
//! them and get back the outputs each batch produced.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod message;
pub mod runtime;
pub mod session;

pub use message::{split_batches, Batch, OutputUnit, Part};
pub use session::{CompileReport, Lab, LabError, Notice, NoticeLevel};

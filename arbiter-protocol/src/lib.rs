#![deny(clippy::all)]

pub mod error;
pub mod report;
pub mod status;

pub use self::status::Status;

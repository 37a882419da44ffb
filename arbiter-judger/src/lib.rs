#![deny(clippy::all)]

pub mod args;
pub mod checking;
pub mod command;
pub mod config;
pub mod error;
pub mod limits;
pub mod paths;
pub mod pipeline;
pub mod predicates;
pub mod result;
pub mod system;
pub mod task;
pub mod tasks;

pub use self::checking::Checking;
pub use self::command::Command;
pub use self::config::Config;
pub use self::error::JudgeError;
pub use self::limits::Limits;
pub use self::result::{CommandResult, ResultDict, ResultValue};
pub use self::system::System;
pub use self::task::{Step, Task, TaskBase, TaskOptions};

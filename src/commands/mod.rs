pub mod run;
pub mod schedule;
pub mod status;
pub mod task;

// Re-export command functions for convenience
pub use run::run;
pub use schedule::schedule;
pub use status::status;
pub use task::task;

pub mod snapshot;
pub mod state;
pub mod story;

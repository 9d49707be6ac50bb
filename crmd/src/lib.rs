pub mod daemon;
pub mod journal;
pub mod service;
pub mod store;
pub mod sync;

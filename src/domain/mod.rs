pub mod actor;
pub mod models;

pub use actor::Actor;

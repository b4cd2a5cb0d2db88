// Domain layer - Core business logic

pub mod edl;
pub mod model;
pub mod naming;
pub mod store;
pub mod timeline;

pub mod metadata;
pub mod session;

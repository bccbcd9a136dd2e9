//! Request handlers

pub mod crud;
pub mod metadata;
pub mod service;

pub use crud::*;
pub use metadata::*;
pub use service::*;

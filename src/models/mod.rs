//! Domain model module declarations.

pub mod credential;
pub mod message;
pub mod session_info;
pub mod start_info;

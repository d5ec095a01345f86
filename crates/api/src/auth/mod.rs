//! Authentication module for Brewlog

#[cfg(test)]
mod edge_case_tests;
pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{require_auth, AuthError, AuthState, AuthUser};

//! Authentication and authorization for WasteWise

pub mod jwt;
pub mod middleware;
pub mod permissions;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{require_auth, AuthState, AuthUser};
pub use permissions::{require_permission, Permission};

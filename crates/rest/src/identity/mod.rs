//! Identity and session management.
//!
//! - [`token`] - HS256 access/refresh token codec
//! - [`password`] - credential hashing
//! - [`session`] - registration, login, refresh rotation and bearer authentication

pub mod password;
pub mod session;
pub mod token;

pub use password::{hash_credential, verify_credential};
pub use session::{
    ChangePassword, LoginRequest, LoginResponse, ProfileUpdate, RegisterUser, SessionService,
};
pub use token::{Claims, TokenKind, TokenPair, TokenService};

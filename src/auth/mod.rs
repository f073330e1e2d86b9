//! Token issuance and verification.

pub mod issuer;
pub mod secret;
pub mod verifier;

pub use issuer::{IssueError, IssueOptions, IssuedToken, TokenIssuer};
pub use verifier::{Rejection, TokenVerifier, VerifyError};

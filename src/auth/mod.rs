/*!
 * # Authentication and Authorization Module
 *
 * Administrator authentication for the storefront:
 *
 * - Signed access, refresh, pre-MFA and setup tokens
 * - Scoped session cookies with a double-submit CSRF token
 * - bcrypt passwords with a legacy digest fallback
 * - TOTP second factor and salted backup codes
 * - Persistent login and MFA rate limiting
 *
 * The gateway combines these into middleware for admin routes, with
 * role-based permission checks.
 */

pub mod cookies;
pub mod gateway;
pub mod mfa;
pub mod password;
pub mod permissions;
pub mod rate_limit;
pub mod tokens;

pub use gateway::{AdminGateway, AdminSession, AuthMode, AuthRouterExt};
pub use permissions::{consts, role_has_permission, Roles};
pub use rate_limit::{RateLimitStatus, RateLimiter};
pub use tokens::{SessionTokens, SessionUser, TokenError, TokenService};

pub mod client;
pub mod ip_allowlist;
pub mod request_id;
pub mod security_headers;

pub use client::ClientInfo;
pub use ip_allowlist::{ip_allowlist_middleware, IpAllowlist};
pub use request_id::request_id_middleware;
pub use security_headers::security_headers_middleware;

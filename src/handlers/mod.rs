// handlers/mod.rs - Route handlers grouped by security tier
//
// Public (no auth) → Tenant-exempt (bearer auth only) → Tenant-scoped (bearer + tenant)
pub mod health;
pub mod realtime;
pub mod tenant;
pub mod whoami;

pub use health::health_get;
pub use realtime::{publish_post, realtime_ws};
pub use tenant::context_get;
pub use whoami::whoami_get;

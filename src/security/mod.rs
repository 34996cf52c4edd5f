pub mod identity;
pub mod flood_guard;
pub mod middleware;

pub use identity::{CallerIdentity, IdentityKind, IdentityResolver};
pub use flood_guard::FloodGuard;

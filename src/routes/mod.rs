/// Router Module Index
///
/// Routing is split by access level; `create_router` wraps each module in the matching
/// middleware layer so a route's protection is decided by where it is registered.
///
/// Paths never repeat across modules. A path whose methods need different access levels
/// (e.g. `GET /municipalities` for anyone, `POST` for admins) lives in `authenticated`
/// and its admin-only handlers take the `AdminUser` extractor.

/// Unauthenticated routes: liveness and login.
pub mod public;

/// Routes behind the bearer-token middleware.
pub mod authenticated;

/// Routes behind the admin gate.
pub mod admin;

//! # Routing Module
//!
//! Decides which request paths are eligible for caching.

pub mod pattern;
pub mod router;

pub use pattern::RoutePattern;
pub use router::{has_query_param, RouteDecision, RouteRule, RouteTable};

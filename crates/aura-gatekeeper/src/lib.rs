//! The Gatekeeper: admission, auth, and rate-limit middleware standing in
//! front of the Workflow Runtime.
//!
//! - [`admission`] — `Gatekeeper::admit`, fingerprinting, coalescence, and
//!   the fail-closed quota check (spec §4.1).
//! - [`auth`] — constant-time API key middleware for the HTTP edge.
//! - [`rate_limit_middleware`] — in-process per-route throttling, layered
//!   in front of admission as a cheap first line of defense; NOT the
//!   tenant quota of record (that's `admission`'s `QuotaStore` call).

pub mod admission;
pub mod auth;
pub mod rate_limit_middleware;

pub use admission::{Admission, Gatekeeper, GatekeeperError, JobSink, RouteQuota};

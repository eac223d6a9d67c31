//! # randomise-me
//!
//! A platform for running randomised trials: multi-participant trials that
//! strangers or invitees join, and self-trials (N=1) where one person
//! re-randomises their own arm before every measurement.
//!
//! ## Module Map
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`model`] | Entities, enums, forms, drafts |
//! | [`access`] | Gate chains and the detail-page visibility resolver |
//! | [`participation`] | Join, leave, launch, randomise |
//! | [`reporting`] | Report parsing, the self-trial cycle, closing, summaries, CSV |
//! | [`store`] | The `TrialStore` seam and its in-memory implementation |
//! | [`db`] | PostgreSQL `TrialStore` |
//! | [`notify`] | Invitation and question notices |
//! | [`config`] | Layered service configuration |
//! | [`prom_metrics`] | Prometheus registry |
//! | [`server`] | axum router and request handlers |

pub mod access;
pub mod config;
pub mod db;
pub mod model;
pub mod notify;
pub mod participation;
pub mod prom_metrics;
pub mod reporting;
pub mod server;
pub mod store;

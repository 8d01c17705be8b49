#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Matching source rows to catalog variants and planning the updates.
//!
//! The [`planner::UpdatePlanner`] drives the other modules: each row is
//! matched by a [`matcher::Matcher`], its price and stock are normalized by
//! [`values`], and stock updates for the same inventory item are collapsed
//! by [`coalesce`] before the final plan is produced.

pub mod coalesce;
pub mod matcher;
pub mod normalize;
pub mod planner;
pub mod values;

pub use matcher::{CatalogIndex, Matcher};
pub use planner::{MatchedRow, PlanOptions, SyncPlan, UpdatePlanner};
pub use values::{ValueError, normalize_price, parse_stock};

/// Campus Rewards - loyalty points ledger for a campus store
///
/// Members earn points on purchases, move them between accounts, redeem
/// them, and receive them from events. The ledger decides whether each
/// movement is legal and applies it atomically with its record.

pub mod account;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod event;
pub mod ledger;
pub mod promotion;
pub mod rate_limit;
pub mod redemption;
pub mod server;

pub use context::AppContext;
pub use error::{RewardsError, RewardsResult};

//! API controllers

pub mod admin;
pub mod health;
pub mod markets;
pub mod markets_status;
pub mod update_markets;

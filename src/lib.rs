//! Court booking and membership service for a pickleball facility.

pub mod app;
pub mod booking;
pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod maintenance;
pub mod services;
pub mod state;
pub mod stripe;
pub mod utils;
pub mod web;

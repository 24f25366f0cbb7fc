//! Real-time remote video pipeline: encoded packets in, RGBA frames on a
//! display surface out.

pub mod auth;
pub mod config;
pub mod convert;
pub mod decoder;
pub mod display;
pub mod pipeline;
pub mod utils;

//! Face-recognition attendance: enroll faces, match captures against the
//! enrolled gallery, and mark each recognised person present once per day.

pub mod attendance;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod faces;
pub mod inbox;
pub mod logging;

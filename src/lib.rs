//! Capture digitizer spectrum frames over UDP onto several disks at once,
//! check every file for lost frames, and recapture until enough clean files
//! exist.

pub mod args;
pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod metadata;
pub mod monitoring;
pub mod packet;
pub mod pipeline;
pub mod sim;
pub mod writer;

pub use packet::{Geometry, HEADER_SIZE, WORD_SIZE};

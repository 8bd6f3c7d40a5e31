//! Object detection on uploaded images and live camera streams, served over HTTP.

pub mod encoder;
pub mod endpoints;
pub mod error;
pub mod frame;
pub mod inferer;
pub mod meter;
pub mod nn;
pub mod pages;
pub mod sensors;
pub mod streamer;
pub mod uploads;
pub mod utils;

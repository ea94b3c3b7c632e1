//! # temstream
//!
//! Live camera streaming and scripted acquisition for transmission electron
//! microscopes used in automated diffraction tomography.
//!
//! A [`stream::VideoStream`] runs the camera on a background thread and keeps
//! the latest preview frame in a single-slot buffer for display sinks, while
//! scripts such as the tilt series in [`experiment`] and the eucentric height
//! search in [`calibrate`] request authoritative one-shot frames through
//! [`stream::VideoStream::get_image`].
//!
//! The camera and stage are reached through the [`capture::Camera`] and
//! [`stage::Stage`] traits. This crate ships simulated implementations of
//! both; vendor drivers implement the same traits.
//!
//! ## Configuration
//!
//! All settings live in one YAML file, loaded with
//! [`config::Config::read_config_file`] and passed to the components that use
//! them. Missing sections take their defaults:
//!
//! ```yml
//! camera:
//!   name: simulate
//!   dimensions: [512, 512]
//!   default_exposure: 0.1
//!   default_binsize: 1
//!   binsizes: [1, 2, 4]
//!   min_exposure: 0.001
//!   max_exposure: 10.0
//! stream:
//!   frametime: 0.1
//!   acquire_timeout: 30.0
//! output:
//!   directory: data
//! ```
pub mod calibrate;
pub mod capture;
pub mod config;
pub mod error;
pub mod experiment;
pub mod frame;
pub mod sink;
pub mod stage;
pub mod stream;

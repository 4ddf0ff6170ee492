// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! The pipeline talks to cameras only through the
//! [`camera::CaptureDevice`] trait:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Pipeline Layer                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌─────────────┐    ┌──────────────────┐   │
//! │  │  GStreamer  │    │    Synthetic     │   │
//! │  │  (appsink)  │    │  (test pattern)  │   │
//! │  └─────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod camera;

//! watergrid_service: Hudson estuary water-quality snapshot service.
//!
//! # Module structure
//!
//! ```text
//! watergrid_service
//! ├── model     : shared data types (readings, snapshot, refresh status, errors)
//! ├── stations  : default USGS station registry and parameter codes
//! ├── normalize : raw column identifier → canonical display name
//! ├── ingest
//! │   └── usgs  : USGS NWIS IV API: URL construction, JSON parsing, client
//! ├── merge     : per-site results → one ordered snapshot
//! ├── store     : locked, atomically replaced snapshot file + status
//! ├── refresh   : refresh cycle coordinator and periodic scheduler
//! ├── server    : HTTP façade (/data, /status, /site-info)
//! ├── config    : TOML config with .env / environment overrides
//! └── logging   : log/env_logger setup and failure classification
//! ```

pub mod config;
pub mod ingest;
pub mod logging;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod refresh;
pub mod server;
pub mod stations;
pub mod store;

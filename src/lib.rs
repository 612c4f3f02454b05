//! maya-link - Main Library
//!
//! Thin application layer over the `meshwire` client library.
//!
//! ## Architecture
//!
//! - **meshwire**: the mesh messaging client (re-exported from workspace)
//! - **logging**: tracing subscriber setup
//! - **bin_common**: configuration path resolution and loading for binaries
//!
//! ## Usage in Binaries
//!
//! ```rust,ignore
//! use maya_link::bin_common::load_client_config;
//! use maya_link::meshwire::Client;
//!
//! maya_link::logging::init_tracing();
//! let client = Client::builder().config(load_client_config()?).build()?;
//! ```

// Re-export workspace libraries for convenience
pub use meshwire;

pub mod logging;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;

    pub use cli::{config_path_from_env, load_client_config, load_client_config_from, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
}

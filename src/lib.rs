pub mod config;
pub mod error;
pub mod graph;
pub mod layout;
pub mod protocol;
pub mod solver;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{Config, load_config};
pub use error::{LayoutError, Result};
pub use layout::{Drawing, compute_drawing};
pub use protocol::{Request, Response, dispatch};

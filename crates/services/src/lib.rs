#![forbid(unsafe_code)]

pub mod app_services;
pub mod book_store;
pub mod config;
pub mod credentials;
pub mod error;
pub mod progress_tracker;
pub mod session_context;

pub use shelf_core::Clock;

pub use app_services::AppServices;
pub use book_store::{BookStore, Shelves};
pub use config::{ServicesConfig, TrackerConfig};
pub use error::{AppServicesError, ConfigError, SessionError, StoreError};
pub use progress_tracker::{ProgressTracker, ScrollSurface, TrackingHandle};
pub use session_context::SessionContext;

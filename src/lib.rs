//! A Rust client for the Portall geospatial indicators API.
//!
//! Every operation is one HTTP POST. The server either answers right away (200)
//! or defers the work to a job (202) that [`Client::call`] polls until the result
//! is ready, so callers always get the final JSON back from a single blocking call.
//!
//! ## Quick start
//! - Set `PYPORTALL_API_KEY` (or pass the key to [`Client::new`]).
//! - Use one of the resolvers, or [`Client::call`] directly.
//!
//! ```no_run
//! use portall::{Client, GeocodingHelper, GeocodingOptions};
//!
//! fn main() -> portall::Result<()> {
//!     let client = Client::from_env()?;
//!     let positions = GeocodingHelper::new(&client)
//!         .with_options(GeocodingOptions::default())
//!         .from_addresses(&["Gran Vía 46, Madrid", "Calle Alcalá 10, Madrid"])?;
//!     for p in &positions {
//!         println!("{:?} -> {:?}", p.address, p.lon_lat());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Large requests can time out when run synchronously; submit them as batch jobs
//! with [`Client::with_batch`] or [`CallOptions::batch`].

#![forbid(unsafe_code)]

mod client;
mod config;
mod dataframe;
mod error;
mod helpers;
mod job;
mod metadata;
mod models;
mod table;
mod transport;

pub use client::{CallOptions, Client};
pub use config::{API_KEY_VAR, ClientConfig, Endpoints};
pub use dataframe::DataFrameHelper;
pub use error::{Error, ErrorBody, Result, classify};
pub use helpers::{GeocodingHelper, IndicatorHelper, IsolineHelper, IsovistHelper};
pub use job::PollFailurePolicy;
pub use metadata::{Aggregate, DataType, Format, IndicatorMetadata, MetadataCache};
pub use models::{
    DayOfWeek, GeocodingOptions, Indicator, Isoline, IsolineMode, Isovist, Moment, Month,
    Normalization, Polygon, Position,
};
pub use table::{DataFrame, FeatureTable};
pub use transport::{HttpTransport, RawRequest, RawResponse, Transport};

//! Public types for the Huginn API.

mod request;
mod result;
mod state;

pub use request::{Filters, LoadRequest, Query, SortOrder};
pub use result::LoadResult;
pub use state::{EngineState, Phase};

pub mod api;
pub mod audit;
pub mod clock;
pub mod error;
pub mod ids;
pub mod patch;
pub mod schema;
pub mod snapshot;
pub mod value;

pub use api::*;
pub use audit::*;
pub use clock::*;
pub use error::{RefugeError, RefugeResult};
pub use ids::*;
pub use patch::*;
pub use schema::*;
pub use snapshot::*;
pub use value::*;

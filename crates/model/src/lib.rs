pub mod chunk;
pub mod error;
pub mod events;
pub mod job;
pub mod record;
pub mod schema;
pub mod value;

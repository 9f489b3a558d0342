mod materialized;
mod tracker;

pub use materialized::Materialized;
pub use tracker::ChangeTracker;

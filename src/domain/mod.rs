pub mod bucket;
pub mod decision;
pub mod key;
pub mod policy;

pub use bucket::{BucketState, BucketTake};
pub use decision::Decision;
pub use key::{KeyBuilder, KeySegment};
pub use policy::{Policy, PolicyConfig, PolicyTable, RoutePolicyConfig};

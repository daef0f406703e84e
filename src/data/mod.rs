//! Dataset loading, categorical encoding and train/test splitting

mod encoder;
mod loader;
mod schema;
mod split;

pub use encoder::{CategoricalColumn, OneHotEncoder};
pub use loader::{DataConfig, DataLoader, Dataset};
pub use schema::FeatureSchema;
pub use split::{train_test_split, Partitions, SplitConfig, TrainTestSplit};

pub mod clock;
pub mod dates;
pub mod followup;
pub mod intent;
pub mod orchestrator;
pub mod prompt;
pub mod quality;
pub mod recover;
pub mod retrieval;

pub use clock::*;
pub use intent::{DateBucket, Intent, IntentClassifier, ListSort};
pub use orchestrator::*;
pub use retrieval::*;

pub use dates::DerivedDate;

pub mod config;
pub mod fields;
pub mod heuristic_extractor;
pub mod intake;
pub mod intent;
pub mod link_builder;
pub mod merge;
pub mod model_extractor;
pub mod session;
pub mod store;
pub mod validators;

pub use config::Config;
pub use fields::{CandidateFields, ValidatedFields};
pub use heuristic_extractor::HeuristicExtractor;
pub use intake::{InboundEvent, IntakeCoordinator, MediaRef};
pub use link_builder::LinkBuilder;
pub use model_extractor::{DocumentInput, ModelExtractor};
pub use session::{SessionEngine, TurnOutcome};
pub use store::{AirtableStore, MemoryStore, RecordStore};

pub mod block;
pub mod entry;
pub mod priority;
pub mod validator;

pub use block::{Block, BlockHeader, GenesisConfig};
pub use entry::{EntryKind, EntryRecord, LedgerEntry, MedicalRecordType, RecordScores, ENTRY_ID_LEN};
pub use priority::{
    Factor, KeywordRule, PriorityBand, PriorityInputs, PriorityProfile, PriorityWeights,
    ProfileKind, WEIGHT_SUM_TOLERANCE,
};
pub use validator::{TierProfile, TierTable, ValidatorRecord, ValidatorTier};

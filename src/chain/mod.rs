//! Block graph and chain selection

mod accept;
pub mod checkpoint;
pub mod error;
pub mod index;
pub mod orphan;
mod process;
pub mod retarget;
pub mod state;
pub mod threshold;
pub mod versionbits;

pub use checkpoint::{find_previous_checkpoint, verify_checkpoint};
pub use error::ChainError;
pub use index::{Ancestors, BlockIndex, BlockNode, NodeId};
pub use orphan::{OrphanBlock, OrphanPool};
pub use state::{BlockChain, ChainSnapshot, ChainState, ProcessOutcome};
pub use threshold::{threshold_state, ConditionChecker, ThresholdCache, ThresholdState};
pub use versionbits::{next_block_version, UnknownRuleReport, VersionBits};

pub mod accumulator;
pub mod filters;
pub mod group;

pub use accumulator::{apply_fragment, ReasoningState, ToolCallState, TurnAccumulator};
pub use group::group_fragments;

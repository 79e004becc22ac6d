//! Validation Rules
//!
//! - `entry_node.rs` - Exactly one start node
//! - `duplicate_node.rs` - Node ids unique within the flow
//! - `dangling_edge.rs` - Edges point at existing nodes
//! - `missing_edge.rs` - Non-terminal nodes have an outgoing edge
//! - `branch_labels.rs` - Multi-output edges are unique and exhaustive
//! - `single_output.rs` - Single-output nodes do not fan out
//! - `jump_target.rs` - Jump targets exist in the same flow
//! - `node_config.rs` - Per-type configuration sanity
//! - `unreachable_node.rs` - Nodes no path from the start reaches

mod branch_labels;
mod dangling_edge;
mod duplicate_node;
mod entry_node;
mod jump_target;
mod missing_edge;
mod node_config;
mod single_output;
mod unreachable_node;

pub use branch_labels::BranchLabelsRule;
pub use dangling_edge::DanglingEdgeRule;
pub use duplicate_node::DuplicateNodeRule;
pub use entry_node::EntryNodeRule;
pub use jump_target::JumpTargetRule;
pub use missing_edge::MissingEdgeRule;
pub use node_config::NodeConfigRule;
pub use single_output::SingleOutputRule;
pub use unreachable_node::UnreachableNodeRule;

//! Story Expander — turns branching stories with typed state into explicit
//! story graphs.
//!
//! A story is authored as logical nodes (linear, choice, random) over a
//! small schema of bounded integers, booleans and enums. Choices carry
//! guard expressions and effects. Expansion walks every reachable
//! `(node, state)` pair and produces a physical graph in which each node
//! has exactly one concrete state, ready for playback devices that keep
//! no runtime variables.

pub mod core;
pub mod schema;

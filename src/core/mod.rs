pub mod effect;
pub mod expander;
pub mod guard;
pub mod initial;
pub mod playthrough;

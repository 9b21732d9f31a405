//! Control engine root.
//!
//! Two independent level loops: tank 1 driven by valve 1, tank 2 by
//! valve 2. Flow-split ratios are operator inputs and are never touched by
//! the automatic loop.

pub mod pid;

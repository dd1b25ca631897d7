#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`loader`]: 시그니처 파일 → [`SignatureSet`]
//! - [`automaton`]: [`SignatureSet`] → [`Dfa`]
//! - [`table`]: [`Dfa`] → [`SerializedTable`] ([`TableSerializer`] 구현체)

pub mod automaton;
pub mod loader;
pub mod table;

// --- 주요 타입 re-export ---

pub use automaton::{Dfa, Matches, StateId, Transition};
pub use loader::SignatureSet;
pub use table::{
    FlatSerializer, PerCpuSerializer, SerializedTable, TableSerializer, possible_cpus,
    value_stride,
};

//! Core domain: errors, variables, templates, and the chain, LLM, tool and
//! memory subsystems.

pub mod chain;
pub mod error;
pub mod llm;
pub mod memory;
pub mod template;
pub mod tool;
pub mod variables;

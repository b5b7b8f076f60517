//! Testing utilities for migration development

pub mod fixtures;
pub mod postgres;

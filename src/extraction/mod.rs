// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod adaptive;
pub mod engine;
pub mod postprocess;
pub mod xpath;

pub use engine::{ExtractionEngine, ExtractionResult, FieldOutcome};

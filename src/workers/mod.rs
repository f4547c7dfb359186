// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod events;
pub mod manager;
pub mod orchestrator;

pub use events::{ProgressEvent, ProgressSink};
pub use manager::JobManager;
pub use orchestrator::JobOrchestrator;

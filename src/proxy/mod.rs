// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod health;
pub mod pool;
pub mod strategy;

pub use pool::{LeaseOutcome, ProxyError, ProxyLease, ProxyPool, ProxyPoolConfig, ProxyRequirements};
pub use strategy::SelectionStrategy;

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体和外部协作者接口
pub mod domain;

/// 引擎模块
///
/// 实现各种网页抓取策略
pub mod engines;

/// 提取模块
///
/// 基于模板的结构化数据提取
pub mod extraction;

/// 分页模块
///
/// 翻页决策与循环保护
pub mod pagination;

/// 代理模块
///
/// 代理池管理、选择策略与健康检查
pub mod proxy;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 任务编排与并发管理
pub mod workers;

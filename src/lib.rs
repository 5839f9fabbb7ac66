//! Agency - Rust 智能体层级控制面
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、能力门、actor 树、调用调度、会议、快照与关闭
//! - **llm**: 推理后端抽象、命名注册表与 Mock / 脚本实现
//! - **memory**: 对话历史条目与快照文件持久化
//! - **observability**: 日志初始化
//! - **resources**: 外部资源提供者与生命周期监管
//! - **tools**: 工具调用线格式、操作参数模式与审计日志

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod resources;
pub mod tools;

pub use crate::core::{Agency, AgencyBuilder, AgencyError, AgencyResult};

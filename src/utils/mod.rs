//! 工具函数

pub mod logging;

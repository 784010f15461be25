// 目录库模块
//
// 备份、恢复和计划记录保存在一个 DuckDB 文件中。DuckDB 连接只在
// 专用线程上的 Actor 内使用，调用方通过消息获得异步、类型安全的接口。
//
// 主要组件：
// - DuckDbManager: 高级API接口，供 Catalog 使用
// - DuckDbActor: 内部Actor，处理实际的数据库操作
// - 数据行和消息定义

mod actor;
mod manager;
mod messages;
mod models;

pub use manager::DuckDbManager;
pub use models::{BackupRow, RestoreRow, ScheduleRow};

// ==========================================
// 关税归类与税费计算引擎 - 应用层
// ==========================================
// 职责: 组装各层实例，供二进制入口与宿主应用使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};

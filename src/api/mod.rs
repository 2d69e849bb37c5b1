// ==========================================
// 关税归类与税费计算引擎 - API 层
// ==========================================
// 职责: 对宿主应用提供业务接口（税率 / 归类 / 批次税费）
// ==========================================

pub mod duty_api;
pub mod error;
pub mod tariff_api;
pub mod validator;

// 重导出核心类型
pub use duty_api::{BatchDetail, DutyApi};
pub use error::{ApiError, ApiResult};
pub use tariff_api::TariffApi;
pub use validator::{ImportValidator, NewCargoItem, NewImportBatch};

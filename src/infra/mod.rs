// ==========================================
// 关税归类与税费计算引擎 - 外部协作方与缓存
// ==========================================
// 职责: 远程归类服务 / 翻译服务 / TTL 缓存
// 约束: 远程调用是唯一的挂起点；缓存由调用方注入
// ==========================================

pub mod classification_client;
pub mod error;
pub mod translation;
pub mod ttl_cache;

pub use classification_client::{
    ClassificationDocument, ClassificationSource, HttpClassificationClient, JsonApiDocument,
    ReferenceEntry,
};
pub use error::{RemoteError, RemoteResult};
pub use translation::{BestEffortTranslator, HttpTranslator, Translator};
pub use ttl_cache::{Clock, ManualClock, SystemClock, TtlCache};

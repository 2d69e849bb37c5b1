// ==========================================
// 关税归类与税费计算引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，将下层错误转换为用户可读的错误消息
// 用户可见失败仅三类: 归类未找到 / 商品未找到 / 导入必填字段缺失
// ==========================================

use crate::engine::{CalculationError, LookupError};
use crate::i18n;
use crate::importer::ImportError;
use crate::infra::RemoteError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 用户可见错误
    // ==========================================
    #[error("未找到编码 {code} 的归类（已尝试: {}）", .tried.join(", "))]
    ClassificationNotFound { code: String, tried: Vec<String> },

    #[error("商品不存在: {0}")]
    ProductNotFound(String),

    /// 缺失的必填字段列表
    #[error("数据验证失败: 缺少字段 {}", .0.join(", "))]
    ValidationError(Vec<String>),

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("批次不存在: {0}")]
    BatchNotFound(String),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 数据访问 / 外部服务错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("远程服务错误: {0}")]
    RemoteServiceError(String),

    #[error("文件导入失败: {0}")]
    ImportError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 面向最终用户的本地化消息
    ///
    /// 三类用户可见失败走 i18n，其余统一为错误原文
    pub fn user_message(&self) -> String {
        match self {
            ApiError::ClassificationNotFound { code, tried } => {
                let tried = tried.join(", ");
                i18n::t_with_args(
                    "lookup.not_found",
                    &[("code", code.as_str()), ("tried", tried.as_str())],
                )
            }
            ApiError::ProductNotFound(id) => {
                i18n::t_with_args("item.product_not_found", &[("id", id.as_str())])
            }
            ApiError::ValidationError(fields) => fields
                .iter()
                .map(|f| i18n::t_with_args("validation.missing_field", &[("field", f.as_str())]))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } if entity == "CargoItem" => {
                ApiError::ProductNotFound(id)
            }
            RepositoryError::NotFound { entity, id } if entity == "ImportBatch" => {
                ApiError::BatchNotFound(id)
            }
            RepositoryError::NotFound { entity, id } => {
                ApiError::InvalidInput(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<RemoteError> for ApiError {
    fn from(err: RemoteError) -> Self {
        ApiError::RemoteServiceError(err.to_string())
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound { code, tried } => ApiError::ClassificationNotFound { code, tried },
            LookupError::InvalidCode(code) => ApiError::InvalidInput(format!("编码格式无效: {}", code)),
            LookupError::Remote(e) => e.into(),
            LookupError::Repository(e) => e.into(),
        }
    }
}

impl From<CalculationError> for ApiError {
    fn from(err: CalculationError) -> Self {
        match err {
            CalculationError::MissingField(field) => ApiError::ValidationError(vec![field]),
            CalculationError::UnknownIncoterm(term) => {
                ApiError::InvalidInput(format!("未知贸易术语: {}", term))
            }
            CalculationError::BatchNotFound(id) => ApiError::BatchNotFound(id),
            CalculationError::ItemNotFound(id) => ApiError::ProductNotFound(id),
            CalculationError::Lookup(e) => e.into(),
            CalculationError::Repository(e) => e.into(),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        ApiError::ImportError(err.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_not_found_conversion() {
        let err: ApiError = LookupError::NotFound {
            code: "6911109999".to_string(),
            tried: vec!["6911109999".to_string(), "6911100000".to_string()],
        }
        .into();
        match &err {
            ApiError::ClassificationNotFound { code, tried } => {
                assert_eq!(code, "6911109999");
                assert_eq!(tried.len(), 2);
            }
            _ => panic!("Expected ClassificationNotFound"),
        }
        let message = err.user_message();
        assert!(message.contains("6911109999"));
        assert!(message.contains("6911100000"));
    }

    #[test]
    fn test_repository_error_conversion() {
        let api_err: ApiError = RepositoryError::NotFound {
            entity: "CargoItem".to_string(),
            id: "I001".to_string(),
        }
        .into();
        assert!(matches!(api_err, ApiError::ProductNotFound(ref id) if id == "I001"));
        assert!(api_err.user_message().contains("I001"));

        let api_err: ApiError = RepositoryError::ForeignKeyViolation("FOREIGN KEY constraint failed".to_string()).into();
        assert!(matches!(api_err, ApiError::BusinessRuleViolation(_)));
    }

    #[test]
    fn test_missing_field_message_lists_every_field() {
        let err = ApiError::ValidationError(vec!["batch_id".to_string(), "total_value".to_string()]);
        let message = err.user_message();
        assert!(message.contains("batch_id"));
        assert!(message.contains("total_value"));
    }
}

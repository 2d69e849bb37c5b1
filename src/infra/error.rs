// ==========================================
// 关税归类与税费计算引擎 - 外部协作方错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 远程归类服务 / 翻译服务错误
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("服务地址无效: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// 远程服务明确返回 404
    #[error("远程记录不存在: {0}")]
    NotFound(String),

    #[error("远程服务返回异常状态: status={status}, path={path}")]
    UpstreamStatus { status: u16, path: String },

    #[error("远程响应格式错误: {0}")]
    MalformedPayload(String),

    #[error("远程请求超时: {0}")]
    Timeout(String),

    #[error("HTTP 请求失败: {0}")]
    Http(String),
}

impl RemoteError {
    /// 是否为确定性的「不存在」（可继续回退）
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

// 实现 From<reqwest::Error>
impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(err.to_string())
        } else if err.is_decode() {
            RemoteError::MalformedPayload(err.to_string())
        } else {
            RemoteError::Http(err.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

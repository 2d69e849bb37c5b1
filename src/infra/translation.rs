// ==========================================
// 关税归类与税费计算引擎 - 描述翻译
// ==========================================
// 红线: 翻译失败永不向调用方传播，失败时保留原文
// ==========================================

use crate::config::TariffConfigReader;
use crate::infra::error::{RemoteError, RemoteResult};
use crate::infra::ttl_cache::{Clock, TtlCache};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

// ==========================================
// Translator Trait
// ==========================================
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        timeout: Duration,
    ) -> RemoteResult<String>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
}

// ==========================================
// HttpTranslator - POST {q, source, target} → {translatedText}
// ==========================================
pub struct HttpTranslator {
    http: Client,
    endpoint: Url,
}

impl HttpTranslator {
    pub fn new(endpoint: &str) -> RemoteResult<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            endpoint: Url::parse(endpoint)?,
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        timeout: Duration,
    ) -> RemoteResult<String> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .timeout(timeout)
            .json(&TranslateRequest {
                q: text,
                source: source_lang,
                target: target_lang,
                format: "text",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::UpstreamStatus {
                status: status.as_u16(),
                path: self.endpoint.path().to_string(),
            });
        }

        let body: TranslateResponse = response.json().await?;
        Ok(body.translated_text)
    }
}

// ==========================================
// BestEffortTranslator - 缓存 + 失败回退原文
// ==========================================
pub struct BestEffortTranslator {
    inner: Option<Arc<dyn Translator>>,
    cache: TtlCache<String, String>,
    source_lang: String,
    target_lang: String,
    timeout: Duration,
}

impl BestEffortTranslator {
    pub fn new(
        inner: Arc<dyn Translator>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        timeout: Duration,
        cache_ttl: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Some(inner),
            cache: TtlCache::new(cache_ttl, clock),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            timeout,
        }
    }

    /// 未配置翻译服务: 始终返回原文
    pub fn disabled() -> Self {
        Self {
            inner: None,
            cache: TtlCache::with_system_clock(chrono::Duration::zero()),
            source_lang: String::new(),
            target_lang: String::new(),
            timeout: Duration::ZERO,
        }
    }

    /// 按配置构造（未配置翻译地址时为 disabled）
    pub async fn from_config(
        reader: &dyn TariffConfigReader,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let Some(endpoint) = reader.get_translation_endpoint().await? else {
            return Ok(Self::disabled());
        };
        let (source, target) = reader.get_translation_languages().await?;
        let timeout_ms = reader.get_translation_timeout_ms().await?;
        let ttl_hours = reader.get_translation_cache_ttl_hours().await?;

        Ok(Self::new(
            Arc::new(HttpTranslator::new(&endpoint)?),
            source,
            target,
            Duration::from_millis(timeout_ms),
            chrono::Duration::hours(ttl_hours as i64),
            clock,
        ))
    }

    /// 翻译；失败 / 超时 / 未配置时返回 None
    pub async fn try_translate(&self, text: &str) -> Option<String> {
        let inner = self.inner.as_ref()?;
        if text.trim().is_empty() {
            return None;
        }

        if let Some(cached) = self.cache.get(&text.to_string()).await {
            return Some(cached);
        }

        let call = inner.translate(text, &self.source_lang, &self.target_lang, self.timeout);
        let translated = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(translated)) if !translated.trim().is_empty() => translated,
            Ok(Ok(_)) => return None,
            Ok(Err(e)) => {
                debug!(error = %e, "翻译失败，保留原文");
                return None;
            }
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "翻译超时，保留原文");
                return None;
            }
        };

        self.cache.insert(text.to_string(), translated.clone()).await;
        Some(translated)
    }

    /// 翻译；任何失败都返回原文
    pub async fn translate(&self, text: &str) -> String {
        self.try_translate(text)
            .await
            .unwrap_or_else(|| text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ttl_cache::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTranslator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Translator for CountingTranslator {
        async fn translate(&self, text: &str, _: &str, _: &str, _: Duration) -> RemoteResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RemoteError::Http("connection refused".to_string()))
            } else {
                Ok(format!("[zh] {}", text))
            }
        }
    }

    fn translator(fail: bool) -> (Arc<CountingTranslator>, BestEffortTranslator) {
        let inner = Arc::new(CountingTranslator {
            calls: AtomicUsize::new(0),
            fail,
        });
        let best_effort = BestEffortTranslator::new(
            inner.clone(),
            "en",
            "zh",
            Duration::from_millis(500),
            chrono::Duration::hours(1),
            Arc::new(ManualClock::default()),
        );
        (inner, best_effort)
    }

    #[tokio::test]
    async fn test_translation_is_cached_by_source_text() {
        let (inner, translator) = translator(false);
        assert_eq!(translator.translate("Tableware").await, "[zh] Tableware");
        assert_eq!(translator.translate("Tableware").await, "[zh] Tableware");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_original_text() {
        let (_, translator) = translator(true);
        assert_eq!(translator.translate("Tableware").await, "Tableware");
        assert!(translator.try_translate("Tableware").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_translator_is_passthrough() {
        let translator = BestEffortTranslator::disabled();
        assert_eq!(translator.translate("Other").await, "Other");
    }
}

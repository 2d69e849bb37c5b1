// ==========================================
// 关税归类与税费计算引擎 - 应用状态
// ==========================================
// 职责: 组装共享连接、仓储、外部服务、引擎与 API 实例
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{DutyApi, TariffApi};
use crate::config::{ConfigManager, TariffConfigReader};
use crate::engine::{
    CalculationSettings, DutyCalculationService, HierarchyResolver, HierarchySettings,
    LookupSettings, TariffLookup,
};
use crate::importer::{RateImporter, RateImporterImpl};
use crate::infra::{
    BestEffortTranslator, ClassificationSource, Clock, HttpClassificationClient, SystemClock,
};
use crate::repository::{
    ShipmentRepository, ShipmentRepositoryImpl, TariffRepository, TariffRepositoryImpl,
};

/// 远程归类服务请求超时
const CLASSIFICATION_TIMEOUT: Duration = Duration::from_secs(15);

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 税率与归类API
    pub tariff_api: Arc<TariffApi>,

    /// 批次税费API
    pub duty_api: Arc<DutyApi>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 说明
    /// 1. 打开共享连接并建表
    /// 2. 从 config_kv 读取引擎设置
    /// 3. 初始化远程服务、引擎与 API
    pub async fn new(db_path: String) -> Result<Self, String> {
        Self::with_source(db_path, None).await
    }

    /// 注入归类数据源（None 时按配置连接远程服务）
    pub async fn with_source(
        db_path: String,
        source: Option<Arc<dyn ClassificationSource>>,
    ) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = crate::db::open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        crate::db::init_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let reader: &dyn TariffConfigReader = config_manager.as_ref();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // ==========================================
        // Repository层
        // ==========================================
        let tariff_repo: Arc<dyn TariffRepository> =
            Arc::new(TariffRepositoryImpl::from_connection(conn.clone()));
        let shipment_repo: Arc<dyn ShipmentRepository> =
            Arc::new(ShipmentRepositoryImpl::from_connection(conn.clone()));

        // ==========================================
        // 外部服务
        // ==========================================
        let source = match source {
            Some(source) => source,
            None => {
                let base_url = reader
                    .get_classification_base_url()
                    .await
                    .map_err(|e| format!("读取归类服务地址失败: {}", e))?;
                Arc::new(
                    HttpClassificationClient::new(&base_url, CLASSIFICATION_TIMEOUT)
                        .map_err(|e| format!("无法创建归类服务客户端: {}", e))?,
                ) as Arc<dyn ClassificationSource>
            }
        };
        let translator = Arc::new(
            BestEffortTranslator::from_config(reader, clock.clone())
                .await
                .map_err(|e| format!("无法创建翻译服务: {}", e))?,
        );

        // ==========================================
        // Engine层
        // ==========================================
        let lookup_settings = LookupSettings::from_config(reader)
            .await
            .map_err(|e| format!("读取查询配置失败: {}", e))?;
        let lookup = Arc::new(TariffLookup::new(
            tariff_repo.clone(),
            source.clone(),
            lookup_settings,
            clock.clone(),
        ));

        let hierarchy_settings = HierarchySettings::from_config(reader)
            .await
            .map_err(|e| format!("读取层级配置失败: {}", e))?;
        let resolver = Arc::new(HierarchyResolver::new(
            source,
            lookup.clone(),
            translator,
            hierarchy_settings,
            clock.clone(),
        ));

        let calculation_settings = CalculationSettings::from_config(reader)
            .await
            .map_err(|e| format!("读取计算配置失败: {}", e))?;
        let calculation = Arc::new(DutyCalculationService::new(
            shipment_repo.clone(),
            lookup.clone(),
            calculation_settings,
            clock,
        ));

        let importer: Arc<dyn RateImporter> = Arc::new(RateImporterImpl::new(
            TariffRepositoryImpl::from_connection(conn.clone()),
        ));

        // ==========================================
        // API层
        // ==========================================
        let tariff_api = Arc::new(TariffApi::new(importer, tariff_repo, lookup, resolver));
        let duty_api = Arc::new(DutyApi::new(shipment_repo, calculation));

        tracing::info!("AppState初始化完成");
        Ok(Self {
            db_path,
            config_manager,
            tariff_api,
            duty_api,
        })
    }
}

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 TARIFF_DUTY_ENGINE_DB_PATH（若设置）
/// - 否则: 用户数据目录/tariff-duty-engine/tariff_duty_engine.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("TARIFF_DUTY_ENGINE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./tariff_duty_engine.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("tariff-duty-engine");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("tariff_duty_engine.db");
        }
    }

    path.to_string_lossy().to_string()
}

// ==========================================
// 关税归类与税费计算引擎 - 命令行入口
// ==========================================
// 用法:
//   tariff-duty-engine import <归类文件> <税则文件>
//   tariff-duty-engine calculate <批次ID>
//   tariff-duty-engine lookup <编码> [原产地]
// 数据库: TARIFF_DUTY_ENGINE_DB_PATH 或用户数据目录
// ==========================================

use anyhow::{anyhow, bail, Context};
use tariff_duty_engine::app::{get_default_db_path, AppState};
use tariff_duty_engine::domain::CalculationOptions;
use tariff_duty_engine::{logging, ApiError, APP_NAME, VERSION};

fn usage() -> String {
    [
        "用法:",
        "  tariff-duty-engine import <classification-file> <duty-file>",
        "  tariff-duty-engine calculate <batch-id>",
        "  tariff-duty-engine lookup <hs-code> [origin]",
    ]
    .join("\n")
}

fn user_facing(err: ApiError) -> anyhow::Error {
    anyhow!(err.user_message())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("{} v{}", APP_NAME, VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(usage());
    };

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);
    let state = AppState::new(db_path)
        .await
        .map_err(|e| anyhow!(e))
        .context("无法初始化AppState")?;

    match (command.as_str(), &args[1..]) {
        ("import", [classification, duty]) => {
            let report = state
                .tariff_api
                .import_rates(classification, duty)
                .await
                .map_err(user_facing)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ("calculate", [batch_id]) => {
            let result = state
                .duty_api
                .calculate_batch(batch_id, CalculationOptions::default())
                .await
                .map_err(user_facing)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        ("lookup", [code, rest @ ..]) if rest.len() <= 1 => {
            let origin = rest.first().map(String::as_str);
            let rate = state
                .tariff_api
                .lookup_rate(code, origin)
                .await
                .map_err(user_facing)?;
            println!("{}", serde_json::to_string_pretty(&rate)?);
        }
        _ => bail!(usage()),
    }

    Ok(())
}

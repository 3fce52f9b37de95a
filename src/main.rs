use std::sync::Arc;

use ai_gateway_lib::{
    BillingWorker, Database, GatewayConfig, LedgerQueue, ProxyServer, ProxyState,
    SqliteLedgerQueue,
};
use anyhow::{Context, Result};

fn init_logger(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

/// 把配置文件中的供应商与模型写入目录表
fn seed_catalog(db: &Database, config: &GatewayConfig) -> Result<()> {
    for provider in &config.providers {
        db.upsert_provider(provider)
            .with_context(|| format!("写入供应商 {} 失败", provider.id))?;
    }
    for model in &config.models {
        db.upsert_model(model)
            .with_context(|| format!("写入模型 {} 失败", model.id))?;
    }
    log::info!(
        "模型目录已加载: {} 个供应商, {} 个模型",
        config.providers.len(),
        config.models.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::load().context("加载配置失败")?;
    init_logger(&config.log_level);

    let db_path = config
        .database_path()
        .context("无法确定数据库路径，请设置 AI_GATEWAY_DB_PATH")?;
    let db = Arc::new(Database::new(&db_path).context("打开数据库失败")?);
    seed_catalog(&db, &config)?;

    let config = Arc::new(config);
    let queue: Arc<dyn LedgerQueue> = Arc::new(SqliteLedgerQueue::new(db.clone()));
    let worker = BillingWorker::start(queue.clone(), db.clone(), config.queue_poll_interval());

    let state = ProxyState::new(db, config.clone(), queue).context("初始化网关状态失败")?;
    let server = ProxyServer::new(state);
    let info = server.start().await.context("启动网关服务器失败")?;
    log::info!(
        "网关监听 {}:{} (production={})",
        info.address,
        info.port,
        config.production
    );

    tokio::signal::ctrl_c()
        .await
        .context("等待退出信号失败")?;
    log::info!("收到退出信号，正在关闭");

    server.stop().await.context("停止网关服务器失败")?;
    let stats = worker.stop().await;
    log::info!(
        "计费 worker 已退出: processed={}, failed={}",
        stats.processed,
        stats.failed
    );
    Ok(())
}

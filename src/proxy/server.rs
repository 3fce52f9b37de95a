//! HTTP网关服务器
//!
//! 基于Axum的HTTP服务器，处理计费网关请求

use super::{
    forwarder::RequestForwarder, handlers, log_codes::srv as log_srv,
    rate_limiter::RateLimiter, types::ProxyServerInfo, ProxyError,
};
use crate::config::GatewayConfig;
use crate::database::Database;
use crate::services::auth::AuthService;
use crate::services::balance::BalanceService;
use crate::services::billing::LedgerQueue;
use crate::services::quota::QuotaEngine;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

/// 网关状态（共享）
#[derive(Clone)]
pub struct ProxyState {
    pub db: Arc<Database>,
    pub config: Arc<GatewayConfig>,
    pub quota: Arc<QuotaEngine>,
    pub balance: Arc<BalanceService>,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ledger_queue: Arc<dyn LedgerQueue>,
    pub forwarder: RequestForwarder,
}

impl ProxyState {
    pub fn new(
        db: Arc<Database>,
        config: Arc<GatewayConfig>,
        ledger_queue: Arc<dyn LedgerQueue>,
    ) -> Result<Self, ProxyError> {
        let forwarder = RequestForwarder::new(config.request_timeout())?;
        Ok(Self {
            quota: Arc::new(QuotaEngine::new(
                db.clone(),
                config.quota_defaults.clone(),
            )),
            balance: Arc::new(BalanceService::new(db.clone())),
            auth: Arc::new(AuthService::new(db.clone())),
            rate_limiter: Arc::new(RateLimiter::new()),
            ledger_queue,
            forwarder,
            db,
            config,
        })
    }
}

/// 构建路由
pub fn router(state: ProxyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/v1/chat/completions",
            post(handlers::handle_chat_completions),
        )
        .route("/v1/quota", get(handlers::get_quota))
        .route("/v1/ledger", get(handlers::get_ledger))
        .route("/v1/balance", get(handlers::get_balance))
        .layer(cors)
        .with_state(state)
}

/// 网关HTTP服务器
pub struct ProxyServer {
    state: ProxyState,
    shutdown_tx: RwLock<Option<oneshot::Sender<()>>>,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl ProxyServer {
    pub fn new(state: ProxyState) -> Self {
        Self {
            state,
            shutdown_tx: RwLock::new(None),
            task: RwLock::new(None),
        }
    }

    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// 绑定端口并在后台任务中提供服务
    ///
    /// 端口为 0 时由系统分配，返回的信息中是实际端口。
    pub async fn start(&self) -> Result<ProxyServerInfo, ProxyError> {
        if self.shutdown_tx.read().await.is_some() {
            return Err(ProxyError::AlreadyRunning);
        }

        let config = &self.state.config;
        let addr: SocketAddr = format!("{}:{}", config.listen_address, config.listen_port)
            .parse()
            .map_err(|e| ProxyError::BindFailed(format!("无效的地址: {e}")))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::BindFailed(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ProxyError::BindFailed(e.to_string()))?;

        log::info!("[{}] 网关服务器启动于 {local_addr}", log_srv::STARTED);

        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let app = router(self.state.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
            {
                log::error!("[{}] 服务器任务异常退出: {e}", log_srv::TASK_ERROR);
            }
        });
        *self.task.write().await = Some(task);

        Ok(ProxyServerInfo {
            address: local_addr.ip().to_string(),
            port: local_addr.port(),
            started_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// 发送关闭信号并等待在途请求结束
    pub async fn stop(&self) -> Result<(), ProxyError> {
        let Some(tx) = self.shutdown_tx.write().await.take() else {
            return Err(ProxyError::NotRunning);
        };
        let _ = tx.send(());

        if let Some(task) = self.task.write().await.take() {
            if let Err(e) = task.await {
                log::error!("[{}] 等待服务器任务结束失败: {e}", log_srv::TASK_ERROR);
            }
        }
        log::info!("[{}] 网关服务器已停止", log_srv::STOPPED);
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.shutdown_tx.read().await.is_some()
    }
}

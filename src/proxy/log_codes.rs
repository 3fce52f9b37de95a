//! 日志错误码定义
//!
//! 格式: [模块-编号] 消息
//! - QTA: Quota (配额)
//! - BIL: Billing (计费队列)
//! - SRV: Server (服务器)
//! - FWD: Forwarder (转发器)
//! - USG: Usage (使用量)

/// 配额日志码
pub mod qta {
    pub const DENIED: &str = "QTA-001";
    pub const RECORD_FAILED: &str = "QTA-002";
    pub const TIMEZONE_FALLBACK: &str = "QTA-003";
    pub const EXCEEDED_MARKED: &str = "QTA-004";
    pub const CHECK_FAILED: &str = "QTA-005";
}

/// 计费队列日志码
pub mod bil {
    pub const ENQUEUE_FAILED: &str = "BIL-001";
    pub const INSERT_FAILED: &str = "BIL-002";
    pub const DECODE_FAILED: &str = "BIL-003";
    pub const FALLBACK_INSERT_FAILED: &str = "BIL-004";
    pub const QUEUE_UNAVAILABLE: &str = "BIL-005";
    pub const WORKER_STARTED: &str = "BIL-006";
    pub const WORKER_STOPPED: &str = "BIL-007";
}

/// 服务器日志码
pub mod srv {
    pub const STARTED: &str = "SRV-001";
    pub const STOPPED: &str = "SRV-002";
    pub const TASK_ERROR: &str = "SRV-004";
}

/// 转发器日志码
pub mod fwd {
    pub const UPSTREAM_FAILED: &str = "FWD-001";
    pub const UPSTREAM_STATUS: &str = "FWD-002";
    pub const DEV_SIMULATED: &str = "FWD-003";
}

/// 使用量日志码
pub mod usg {
    pub const USAGE_MISSING: &str = "USG-001";
    pub const PRICING_NOT_FOUND: &str = "USG-002";
}

//! API Key 认证
//!
//! 只保存 Key 的 SHA-256 摘要，原始 Key 仅在创建时返回一次。

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::database::Database;
use crate::error::AppError;

const KEY_PREFIX: &str = "gw-";

/// 认证通过的调用方
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub api_key_id: String,
}

pub fn hash_api_key(raw: &str) -> String {
    Sha256::digest(raw.trim().as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub struct AuthService {
    db: Arc<Database>,
}

impl AuthService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// 创建新的 API Key，返回 (key_id, 原始 Key)
    pub fn create_api_key(
        &self,
        user_id: &str,
        name: Option<&str>,
    ) -> Result<(String, String), AppError> {
        let raw = format!("{KEY_PREFIX}{}", uuid::Uuid::new_v4().simple());
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .insert_api_key(&id, user_id, &hash_api_key(&raw), name)?;
        log::info!("已为用户 {user_id} 创建 API Key {id}");
        Ok((id, raw))
    }

    /// 以摘要查找启用的 Key
    pub fn authenticate(&self, raw: &str) -> Result<Option<Identity>, AppError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let record = self.db.find_api_key_by_hash(&hash_api_key(raw))?;
        Ok(record.filter(|r| r.active).map(|r| Identity {
            user_id: r.user_id,
            api_key_id: r.id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_hex_sha256() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_authenticate_created_key() {
        let db = Arc::new(Database::memory().unwrap());
        let auth = AuthService::new(db.clone());
        let (id, raw) = auth.create_api_key("u1", Some("cli")).unwrap();

        let identity = auth.authenticate(&raw).unwrap().expect("identity");
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.api_key_id, id);

        assert!(auth.authenticate("gw-wrong").unwrap().is_none());
        assert!(auth.authenticate("").unwrap().is_none());

        db.set_api_key_active(&id, false).unwrap();
        assert!(auth.authenticate(&raw).unwrap().is_none());
    }
}

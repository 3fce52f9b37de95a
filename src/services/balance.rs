//! 账户余额
//!
//! 余额 = 已支付总额 - 账本总成本。账本由后台 worker 异步写入，
//! 余额可能暂时滞后于刚完成的请求。

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::database::Database;
use crate::error::AppError;

pub struct BalanceService {
    db: Arc<Database>,
}

impl BalanceService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get_balance(&self, user_id: &str) -> Result<Decimal, AppError> {
        let paid = self.db.get_total_paid(user_id)?;
        let spent = self.db.get_total_ledger_cost(user_id)?;
        Ok(paid - spent)
    }

    /// 余额是否足以支付 `required`
    pub fn has_sufficient_balance(
        &self,
        user_id: &str,
        required: Decimal,
    ) -> Result<(bool, Decimal), AppError> {
        let balance = self.get_balance(user_id)?;
        Ok((balance >= required, balance))
    }

    /// 记录一笔已完成的支付
    pub fn record_payment(&self, user_id: &str, amount: Decimal) -> Result<String, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(format!("支付金额必须为正数: {amount}")));
        }
        let id = self.db.insert_payment(user_id, amount, "paid")?;
        log::info!("用户 {user_id} 充值 {amount}");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerEntry;

    #[test]
    fn test_balance_is_paid_minus_ledgered() {
        let db = Arc::new(Database::memory().unwrap());
        let service = BalanceService::new(db.clone());
        service.record_payment("u1", Decimal::new(500, 2)).unwrap();
        db.insert_ledger_entry(&LedgerEntry::new("u1", None, "m1", 1, 1, Decimal::new(125, 2)))
            .unwrap();

        assert_eq!(service.get_balance("u1").unwrap(), Decimal::new(375, 2));
        assert_eq!(
            service
                .has_sufficient_balance("u1", Decimal::new(4, 0))
                .unwrap(),
            (false, Decimal::new(375, 2))
        );
        assert!(service.record_payment("u1", Decimal::ZERO).is_err());
    }
}

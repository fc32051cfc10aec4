// ==========================================
// 经销商库存同步系统 - 库存数量状态派生
// ==========================================
// 职责: 由状态与各数量字段派生 available_for_sale
// 规则:
//   - blocked   → 0（忽略上游给出的值）
//   - confirmed + received 已知
//               → max(0, received - blocked - out_for_delivery - sold)
//   - confirmed + received 未知
//               → 上游给出的可售数，下限 0（缺失为 0）
// 红线: 收货确认由外部系统完成，本模块只计算不改状态
// ==========================================

use crate::domain::stock::StockMovementRow;
use crate::domain::types::StockStatus;

pub struct StockStateDerivationService;

impl Default for StockStateDerivationService {
    fn default() -> Self {
        Self::new()
    }
}

impl StockStateDerivationService {
    pub fn new() -> Self {
        Self
    }

    pub fn derive_available_for_sale(&self, row: &StockMovementRow) -> i64 {
        match row.status {
            StockStatus::Blocked => 0,
            StockStatus::Confirmed => match row.received_quantity {
                // 上游数量可能为任意 i64，饱和减避免溢出
                Some(received) => received
                    .saturating_sub(row.blocked_quantity)
                    .saturating_sub(row.out_for_delivery_quantity)
                    .saturating_sub(row.sold_quantity)
                    .max(0),
                None => row.provided_available_for_sale.unwrap_or(0).max(0),
            },
        }
    }

    /// 原地回填派生值
    pub fn apply(&self, row: &mut StockMovementRow) {
        row.available_for_sale = self.derive_available_for_sale(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: StockStatus, received: Option<i64>, provided: Option<i64>) -> StockMovementRow {
        StockMovementRow {
            status,
            received_quantity: received,
            provided_available_for_sale: provided,
            blocked_quantity: 3,
            out_for_delivery_quantity: 2,
            sold_quantity: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_blocked_forces_zero() {
        let service = StockStateDerivationService::new();
        assert_eq!(
            service.derive_available_for_sale(&row(StockStatus::Blocked, Some(100), Some(50))),
            0
        );
    }

    #[test]
    fn test_confirmed_with_received() {
        let service = StockStateDerivationService::new();
        assert_eq!(
            service.derive_available_for_sale(&row(StockStatus::Confirmed, Some(10), Some(99))),
            4
        );
        // 不会出现负数
        assert_eq!(
            service.derive_available_for_sale(&row(StockStatus::Confirmed, Some(4), None)),
            0
        );
    }

    #[test]
    fn test_extreme_quantities_saturate() {
        let service = StockStateDerivationService::new();
        let mut r = row(StockStatus::Confirmed, Some(i64::MAX), None);
        r.blocked_quantity = -1;
        r.out_for_delivery_quantity = 0;
        r.sold_quantity = 0;
        assert_eq!(service.derive_available_for_sale(&r), i64::MAX);

        let mut r = row(StockStatus::Confirmed, Some(i64::MIN), None);
        r.blocked_quantity = i64::MAX;
        assert_eq!(service.derive_available_for_sale(&r), 0);
    }

    #[test]
    fn test_confirmed_without_received_keeps_provided() {
        let service = StockStateDerivationService::new();
        assert_eq!(
            service.derive_available_for_sale(&row(StockStatus::Confirmed, None, Some(7))),
            7
        );
        assert_eq!(
            service.derive_available_for_sale(&row(StockStatus::Confirmed, None, Some(-5))),
            0
        );
        assert_eq!(
            service.derive_available_for_sale(&row(StockStatus::Confirmed, None, None)),
            0
        );
    }

    #[test]
    fn test_apply_writes_back() {
        let service = StockStateDerivationService::new();
        let mut r = row(StockStatus::Confirmed, Some(20), None);
        service.apply(&mut r);
        assert_eq!(r.available_for_sale, 14);
    }
}

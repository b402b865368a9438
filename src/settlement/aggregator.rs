// Aggregator - reduces a day's payments into per-partner totals
//
// Pure and deterministic: the caller already filtered by status and window,
// so every record handed in counts exactly once toward its partner.

use crate::payment::PaymentRecord;
use crate::settlement::models::SettlementAggregate;
use rust_decimal::Decimal;

/// Sum payment amounts by partner using exact decimal arithmetic
pub fn aggregate(records: &[PaymentRecord]) -> SettlementAggregate {
    let mut aggregated = SettlementAggregate::new();

    for record in records {
        *aggregated.entry(record.partner_id).or_insert(Decimal::ZERO) += record.amount;
    }

    aggregated
}

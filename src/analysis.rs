//! Derived metrics computed from normalized records.

use crate::cleaner::round2;
use crate::models::{FieldValue, NormalizedRecord};

const LAST_CLOSE_LABEL: &str = "Último Preço de Fechamento";
const PROFIT_PER_SHARE_FRAGMENT: &str = "Lucro/Ação";

/// Earnings Yield = (profit per share / last close price) * 100.
///
/// Profit per share comes from the first field whose label mentions
/// "Lucro/Ação" (the 12-month figure precedes the quarterly one in page
/// order). Both inputs must be numeric and the price positive; otherwise
/// the metric is omitted. Never an error, never zero-filled, and it does
/// not influence the record status.
pub fn earnings_yield(record: &NormalizedRecord) -> Option<f64> {
    let profit = record
        .fields()
        .iter()
        .find(|(label, value)| {
            label.contains(PROFIT_PER_SHARE_FRAGMENT) && value.as_f64().is_some()
        })
        .and_then(|(_, value)| value.as_f64())?;

    let price = match record.get(LAST_CLOSE_LABEL)? {
        value @ (FieldValue::Currency(_) | FieldValue::ScaledCurrency(_) | FieldValue::Ratio(_)) => {
            value.as_f64()?
        }
        _ => return None,
    };

    if price <= 0.0 {
        return None;
    }

    Some(round2(profit / price * 100.0))
}

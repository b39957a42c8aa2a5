// Book Math - shared order book statistics for layer3 consumers

use crate::layer2::parser::PriceLevel;

/// `(Σbids − Σasks) / (Σbids + Σasks)` over the given levels, 0.0 on an empty book
pub fn calc_imbalance(bids: &[PriceLevel], asks: &[PriceLevel]) -> f64 {
    let bid_qty: f64 = bids.iter().map(|l| l.quantity).sum();
    let ask_qty: f64 = asks.iter().map(|l| l.quantity).sum();
    let total = bid_qty + ask_qty;
    if total <= 0.0 {
        return 0.0;
    }
    (bid_qty - ask_qty) / total
}

/// Median level quantity, 0.0 for no levels
pub fn median_quantity(levels: &[PriceLevel]) -> f64 {
    if levels.is_empty() {
        return 0.0;
    }
    let mut qtys: Vec<f64> = levels.iter().map(|l| l.quantity).collect();
    qtys.sort_by(|a, b| a.total_cmp(b));

    let mid = qtys.len() / 2;
    if qtys.len() % 2 == 0 {
        (qtys[mid - 1] + qtys[mid]) / 2.0
    } else {
        qtys[mid]
    }
}

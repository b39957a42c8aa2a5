// Wall Signal - Binance Futures order book wall-drop signals and round scoring
// Layered: core -> layer1 (connectors) -> layer2 (sync) -> layer3 (analytics) -> layer4 (pipeline)

pub mod core;
pub mod layer1;
pub mod layer2;
pub mod layer3;
pub mod layer4;

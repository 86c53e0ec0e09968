//! Static industry lookup keyed on the first two digits of a TWSE code.

/// Label for prefixes missing from the table.
pub const CATCH_ALL_INDUSTRY: &str = "其他";

/// Two-digit code prefix to industry label.
const PREFIX_TABLE: &[(&str, &str)] = &[
    ("00", "ETF"),
    ("11", "水泥工業"),
    ("12", "食品工業"),
    ("13", "塑膠工業"),
    ("14", "紡織纖維"),
    ("15", "電機機械"),
    ("16", "電器電纜"),
    ("17", "化學工業"),
    ("18", "玻璃陶瓷"),
    ("19", "造紙工業"),
    ("20", "鋼鐵工業"),
    ("21", "橡膠工業"),
    ("22", "汽車工業"),
    ("23", "半導體業"),
    ("24", "電子零組件業"),
    ("25", "建材營造"),
    ("26", "航運業"),
    ("27", "觀光餐旅"),
    ("28", "金融保險"),
    ("29", "貿易百貨"),
    ("30", "電子通路業"),
    ("31", "光電業"),
    ("32", "電腦及週邊設備業"),
    ("33", "其他電子業"),
    ("34", "光電業"),
    ("35", "電子零組件業"),
    ("36", "資訊服務業"),
    ("37", "電子零組件業"),
    ("41", "生技醫療"),
    ("44", "紡織纖維"),
    ("45", "電機機械"),
    ("47", "化學工業"),
    ("49", "通信網路業"),
    ("52", "其他電子業"),
    ("55", "建材營造"),
    ("56", "航運業"),
    ("57", "觀光餐旅"),
    ("58", "金融保險"),
    ("59", "貿易百貨"),
    ("60", "金融保險"),
    ("61", "電子零組件業"),
    ("62", "電子零組件業"),
    ("64", "生技醫療"),
    ("65", "半導體業"),
    ("66", "電子零組件業"),
    ("80", "電子零組件業"),
    ("81", "電子零組件業"),
    ("82", "電子零組件業"),
    ("83", "電腦及週邊設備業"),
    ("84", "生技醫療"),
    ("89", "居家生活"),
    ("99", "綜合"),
];

/// Industry label for a ticker code.
pub fn industry_for_code(code: &str) -> &'static str {
    let prefix = match code.get(..2) {
        Some(p) => p,
        None => return CATCH_ALL_INDUSTRY,
    };

    PREFIX_TABLE
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, label)| *label)
        .unwrap_or(CATCH_ALL_INDUSTRY)
}

/// All distinct labels in table order, catch-all last.
pub fn industry_labels() -> Vec<&'static str> {
    let mut labels: Vec<&'static str> = Vec::new();
    for (_, label) in PREFIX_TABLE {
        if !labels.contains(label) {
            labels.push(label);
        }
    }
    labels.push(CATCH_ALL_INDUSTRY);
    labels
}

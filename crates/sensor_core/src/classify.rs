//! Classificação de leituras – avaliação de thresholds.

use crate::config::Thresholds;
use crate::types::Status;

/// Retorna o [`Status`] de uma leitura.
///
/// Overvoltage é checado primeiro: uma leitura que estoura os dois
/// thresholds é sempre `Overvoltage`, nunca `Overheat`.
/// Comparação estrita (`>`): valor igual ao threshold é `Normal`.
pub fn classify(voltage: f64, temperature: f64, thresholds: &Thresholds) -> Status {
    if voltage > thresholds.voltage {
        Status::Overvoltage
    } else if temperature > thresholds.temperature {
        Status::Overheat
    } else {
        Status::Normal
    }
}

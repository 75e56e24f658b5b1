//! Protocolo de linha do Arduino.
//!
//! Cada frame é uma linha de texto terminada em `\n`:
//!
//! ```text
//! Data: <Device>,Voltage: <float><unidade?> ...,Temp: <float><unidade?> ...
//! └── segmento 0 ──┘└──── segmento 1 ────────┘└──── segmento 2 ──────┘
//! ```
//!
//! - `<Device>` é um de `Master`, `Backup`, `Slave`
//! - Valor = primeiro token após o `:` do segmento; sufixo de unidade é ignorado
//! - Linhas sem marcador de dispositivo são ruído (boot, debug) e não geram leitura

use chrono::NaiveDateTime;

use crate::types::{Device, RawFrame};

/// Marcadores reconhecidos, na ordem de precedência.
pub const DEVICE_MARKERS: [(&str, Device); 3] = [
    ("Data: Backup", Device::Backup),
    ("Data: Master", Device::Master),
    ("Data: Slave", Device::Slave),
];

const VOLTAGE_SEGMENT: usize = 1;
const TEMP_SEGMENT: usize = 2;

/// Linha reconhecida mas impossível de interpretar (MalformedLine).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Segmento {index} ({field}) ausente")]
    MissingSegment { index: usize, field: &'static str },

    #[error("Segmento {field} sem ':'")]
    MissingColon { field: &'static str },

    #[error("Segmento {field} sem valor")]
    MissingValue { field: &'static str },

    #[error("Valor inválido para {field}: '{token}'")]
    InvalidNumber { field: &'static str, token: String },
}

/// Valores extraídos de uma linha reconhecida (ainda sem classificação).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorLine {
    pub device: Device,
    pub voltage: f64,
    pub temperature: f64,
}

// ──────────────────────────────────────────────
// Decodificação de frames
// ──────────────────────────────────────────────

/// Decodifica bytes em texto, descartando sequências UTF-8 inválidas.
///
/// Nunca falha: bytes totalmente inválidos resultam em string vazia.
/// Espaços e terminadores (`\r\n`) nas pontas são removidos.
pub fn decode_text(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text.trim().to_string()
}

impl RawFrame {
    /// Monta um frame a partir dos bytes lidos do transporte.
    pub fn decode(bytes: Vec<u8>, timestamp: NaiveDateTime) -> Self {
        let text = decode_text(&bytes);
        Self {
            timestamp,
            text: (!text.is_empty()).then_some(text),
            bytes,
        }
    }
}

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

/// Retorna o dispositivo marcado na linha, se houver.
pub fn device_marker(line: &str) -> Option<Device> {
    DEVICE_MARKERS
        .iter()
        .find(|(marker, _)| line.contains(marker))
        .map(|&(_, device)| device)
}

/// Interpreta uma linha de texto.
///
/// - `Ok(None)` → linha sem marcador (ignorada pelo pipeline)
/// - `Ok(Some(_))` → leitura válida
/// - `Err(_)` → linha reconhecida mas malformada
pub fn parse_line(line: &str) -> Result<Option<SensorLine>, ProtocolError> {
    let Some(device) = device_marker(line) else {
        return Ok(None);
    };

    let segments: Vec<&str> = line.split(',').collect();
    let voltage = field_value(&segments, VOLTAGE_SEGMENT, "Voltage")?;
    let temperature = field_value(&segments, TEMP_SEGMENT, "Temp")?;

    Ok(Some(SensorLine {
        device,
        voltage,
        temperature,
    }))
}

fn field_value(segments: &[&str], index: usize, field: &'static str) -> Result<f64, ProtocolError> {
    let segment = segments
        .get(index)
        .ok_or(ProtocolError::MissingSegment { index, field })?;

    // Texto entre o primeiro e o segundo ':'
    let after_colon = segment
        .split(':')
        .nth(1)
        .ok_or(ProtocolError::MissingColon { field })?;

    let token = after_colon
        .split_whitespace()
        .next()
        .ok_or(ProtocolError::MissingValue { field })?;

    parse_number(token).ok_or_else(|| ProtocolError::InvalidNumber {
        field,
        token: token.to_string(),
    })
}

/// Converte `"6.0V"`, `"20.0°C"`, `"-3"` etc. Rejeita NaN/infinito.
fn parse_number(token: &str) -> Option<f64> {
    let numeric = token.trim_end_matches(|c: char| c.is_alphabetic() || c == '°' || c == '%');
    numeric.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn parses_master_line_with_units() {
        let parsed = parse_line("Data: Master,Voltage: 6.0V,Temp: 20.0C")
            .unwrap()
            .unwrap();
        assert_eq!(parsed.device, Device::Master);
        assert_eq!(parsed.voltage, 6.0);
        assert_eq!(parsed.temperature, 20.0);
    }

    #[test]
    fn parses_spaced_units_and_trailing_text() {
        let parsed = parse_line("Data: Backup,Voltage: 4.98 V (ok),Temp: 27.25 °C status")
            .unwrap()
            .unwrap();
        assert_eq!(parsed.device, Device::Backup);
        assert_eq!(parsed.voltage, 4.98);
        assert_eq!(parsed.temperature, 27.25);
    }

    #[test]
    fn parses_degree_suffix() {
        let parsed = parse_line("Data: Slave,Voltage: 5.1,Temp: 31.0°C")
            .unwrap()
            .unwrap();
        assert_eq!(parsed.device, Device::Slave);
        assert_eq!(parsed.temperature, 31.0);
    }

    #[test]
    fn non_numeric_voltage_is_malformed() {
        let err = parse_line("Data: Slave,Voltage: abc,Temp: 25.0C").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidNumber { field: "Voltage", .. }
        ));
    }

    #[test]
    fn missing_temperature_segment_is_malformed() {
        assert_eq!(
            parse_line("Data: Master,Voltage: 5.0V").unwrap_err(),
            ProtocolError::MissingSegment {
                index: 2,
                field: "Temp"
            }
        );
    }

    #[test]
    fn missing_colon_is_malformed() {
        assert_eq!(
            parse_line("Data: Master,Voltage 5.0V,Temp: 20C").unwrap_err(),
            ProtocolError::MissingColon { field: "Voltage" }
        );
    }

    #[test]
    fn empty_value_is_malformed() {
        assert_eq!(
            parse_line("Data: Master,Voltage:   ,Temp: 20C").unwrap_err(),
            ProtocolError::MissingValue { field: "Voltage" }
        );
    }

    #[test]
    fn nan_and_inf_are_rejected() {
        assert!(parse_line("Data: Master,Voltage: NaN,Temp: 20C").is_err());
        assert!(parse_line("Data: Master,Voltage: inf,Temp: 20C").is_err());
    }

    #[test]
    fn unrecognized_line_is_ignored() {
        assert_eq!(parse_line("Arduino boot v1.2 ..."), Ok(None));
        assert_eq!(parse_line("Voltage: 5.0,Temp: 20.0"), Ok(None));
        assert_eq!(parse_line(""), Ok(None));
    }

    #[test]
    fn backup_marker_takes_precedence() {
        assert_eq!(
            device_marker("Data: Master relay Data: Backup"),
            Some(Device::Backup)
        );
        assert_eq!(device_marker("Data: Slave / Data: Master"), Some(Device::Master));
    }

    #[test]
    fn decode_strips_terminators() {
        assert_eq!(decode_text(b"  Data: Master,Voltage: 1\r\n"), "Data: Master,Voltage: 1");
    }

    #[test]
    fn decode_drops_invalid_sequences() {
        let bytes = b"Data: \xff\xfeMaster,Voltage: 5.0\xc3,Temp: 20\n";
        assert_eq!(decode_text(bytes), "Data: Master,Voltage: 5.0,Temp: 20");
    }

    #[test]
    fn decode_keeps_valid_multibyte() {
        assert_eq!(decode_text("Temp: 20°C\n".as_bytes()), "Temp: 20°C");
    }

    #[test]
    fn garbage_frame_has_no_text() {
        let frame = RawFrame::decode(vec![0xff, 0xfe, 0x80, b'\r', b'\n'], ts());
        assert_eq!(frame.text, None);
        assert_eq!(frame.bytes.len(), 5);
    }

    #[test]
    fn frame_keeps_raw_bytes_and_text() {
        let bytes = b"Data: Master,Voltage: 6.0V,Temp: 20.0C\r\n".to_vec();
        let frame = RawFrame::decode(bytes.clone(), ts());
        assert_eq!(frame.bytes, bytes);
        assert_eq!(
            frame.text.as_deref(),
            Some("Data: Master,Voltage: 6.0V,Temp: 20.0C")
        );
    }
}

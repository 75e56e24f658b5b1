//! Definição de tipos para leituras de sensores recebidas via serial.
//!
//! Cada linha reconhecida do Arduino vira uma [`Reading`] imutável;
//! leituras fora do normal geram também um [`ErrorRecord`] com back-link.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Formato de timestamp usado nas tabelas e no arquivo bruto.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formata um timestamp no padrão das tabelas.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// ──────────────────────────────────────────────
// Dispositivo / Transporte
// ──────────────────────────────────────────────

/// Dispositivo de origem marcado na linha (`Data: <Device>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Master,
    Backup,
    Slave,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Master => "Master",
            Device::Backup => "Backup",
            Device::Slave => "Slave",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Um dos dois transportes seriais redundantes.
///
/// Também identifica qual tabela tem a autoridade de persistência.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Master,
    Backup,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Master => "Master",
            Transport::Backup => "Backup",
        })
    }
}

// ──────────────────────────────────────────────
// Status
// ──────────────────────────────────────────────

/// Classificação de uma leitura contra os thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Normal,
    Overvoltage,
    Overheat,
}

impl Status {
    pub fn is_normal(self) -> bool {
        self == Status::Normal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Normal => "Normal",
            Status::Overvoltage => "Overvoltage",
            Status::Overheat => "Overheat",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────────────────────────────────
// Leituras
// ──────────────────────────────────────────────

/// Leitura classificada. Imutável depois de criada.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub device: Device,
    /// Tensão (V)
    pub voltage: f64,
    /// Temperatura (°C)
    pub temperature: f64,
    pub status: Status,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.2}V {:.2}°C {}",
            format_timestamp(&self.timestamp),
            self.device,
            self.voltage,
            self.temperature,
            self.status
        )
    }
}

/// Leitura fora do normal + posição (1-based) dela na tabela Readings.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub reading: Reading,
    pub link: usize,
}

// ──────────────────────────────────────────────
// Frame bruto
// ──────────────────────────────────────────────

/// Frame recebido do transporte ativo. Transiente: nunca é persistido
/// como entidade estruturada, apenas no arquivo bruto.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub timestamp: NaiveDateTime,
    pub bytes: Vec<u8>,
    /// Texto decodificado (None se a decodificação não produziu conteúdo)
    pub text: Option<String>,
}

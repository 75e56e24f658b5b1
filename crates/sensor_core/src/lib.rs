//! # Sensor Core
//!
//! Crate compartilhada que define o modelo de dados, o protocolo de linha
//! do Arduino, a classificação por thresholds, as tabelas em memória e a
//! configuração TOML do logger serial.
//!
//! ## Módulos
//! - [`types`] – Reading, ErrorRecord, RawFrame, Device, Status
//! - [`protocol`] – Decodificação de frames e parser de linhas
//! - [`classify`] – Thresholds → Status
//! - [`table`] – SourceTable (Readings + Errors) append-only
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod classify;
pub mod table;
pub mod config;

// Re-exports convenientes
pub use types::{Device, ErrorRecord, RawFrame, Reading, Status, Transport};
pub use protocol::{parse_line, ProtocolError, SensorLine};
pub use classify::classify;
pub use table::SourceTable;
pub use config::{AppConfig, Thresholds, TransportConfig};

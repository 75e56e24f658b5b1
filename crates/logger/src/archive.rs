//! Arquivo bruto – registro append-only de todos os frames.
//!
//! ```text
//! 2024-06-01 08:00:00 | Raw Bytes: 446174613a204d6173746572...
//! 2024-06-01 08:00:00 | Raw: Data: Master,Voltage: 5.0V,Temp: 20.0C
//! ```
//!
//! Falhas aqui nunca interrompem a ingestão: viram `warn!` e seguem.

use sensor_core::types::format_timestamp;
use sensor_core::RawFrame;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Substituto para textos que não cabem em uma linha do arquivo.
pub const UNPRINTABLE: &str = "[Unprintable data]";

pub struct RawArchive {
    path: Option<PathBuf>,
}

impl RawArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Arquivo desligado: todas as chamadas viram no-op.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Registra o frame: hex sempre, texto se houver.
    pub fn record_frame(&self, frame: &RawFrame) {
        let ts = format_timestamp(&frame.timestamp);
        self.append(&bytes_entry(&ts, &frame.bytes));
        if let Some(text) = &frame.text {
            self.append(&text_entry(&ts, text));
        }
    }

    /// Registra uma nota operacional (erro de parse, de gravação…).
    pub fn record_note(&self, timestamp: &str, note: &str) {
        self.append(&text_entry(timestamp, note));
    }

    fn append(&self, entry: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{entry}"));
        if let Err(e) = result {
            warn!("Não foi possível gravar no arquivo bruto {}: {e}", path.display());
        }
    }
}

fn bytes_entry(timestamp: &str, bytes: &[u8]) -> String {
    format!("{timestamp} | Raw Bytes: {}", hex::encode(bytes))
}

fn text_entry(timestamp: &str, text: &str) -> String {
    let printable = !text.chars().any(|c| c.is_control() && c != '\t');
    if printable {
        format!("{timestamp} | Raw: {text}")
    } else {
        format!("{timestamp} | Raw: {UNPRINTABLE}")
    }
}

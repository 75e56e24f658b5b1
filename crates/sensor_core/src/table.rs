//! Tabelas em memória (Readings + Errors) de uma fonte.
//!
//! Append-only: uma leitura anexada nunca é alterada nem removida.
//! A persistência reescreve o snapshot inteiro a cada evento.

use crate::types::{ErrorRecord, Reading};

/// Erros ao reconstruir uma tabela a partir de dados persistidos.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("Error Link {link} fora do intervalo 1..={readings}")]
    DanglingLink { link: usize, readings: usize },

    #[error("Error Link {link} aponta para leitura Normal")]
    LinkToNormal { link: usize },

    #[error("Error Link {link} aponta para uma leitura diferente do registro de erro")]
    LinkMismatch { link: usize },
}

/// Par Readings/Errors de uma fonte.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTable {
    readings: Vec<Reading>,
    errors: Vec<ErrorRecord>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstrói uma tabela validando todos os back-links.
    pub fn from_parts(readings: Vec<Reading>, errors: Vec<ErrorRecord>) -> Result<Self, TableError> {
        for record in &errors {
            let Some(target) = record
                .link
                .checked_sub(1)
                .and_then(|i| readings.get(i))
            else {
                return Err(TableError::DanglingLink {
                    link: record.link,
                    readings: readings.len(),
                });
            };
            if target.status.is_normal() {
                return Err(TableError::LinkToNormal { link: record.link });
            }
            if *target != record.reading {
                return Err(TableError::LinkMismatch { link: record.link });
            }
        }
        Ok(Self { readings, errors })
    }

    /// Anexa uma leitura; se não for Normal, anexa também o ErrorRecord.
    ///
    /// Retorna o link (posição 1-based em Readings) quando houve erro.
    pub fn append(&mut self, reading: Reading) -> Option<usize> {
        let error = (!reading.status.is_normal()).then(|| reading.clone());
        self.readings.push(reading);

        error.map(|reading| {
            let link = self.readings.len();
            self.errors.push(ErrorRecord { reading, link });
            link
        })
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
